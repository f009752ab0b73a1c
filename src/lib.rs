//! # PinSub
//!
//! `pinsub` is an asynchronous publish/subscribe client for an MQTT broker,
//! used to drive an output pin from messages on a topic.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `client`: The pub/sub client: outbound queue, publish worker, connection supervisor and inbound dispatch.
//! - `config`: Handles loading and managing application configuration.
//! - `gpio`: The output-pin contract and the commands inbound messages carry.
//! - `utils`: Contains shared utilities, such as error types and logging.

pub mod client;
pub mod config;
pub mod gpio;
pub mod utils;
