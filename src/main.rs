//! PinSub controller
//!
//! Subscribes to the configured topic and drives the output pin from
//! `SetHigh` / `SetLow` messages until interrupted.

use std::sync::{Arc, Mutex, PoisonError};

use pinsub::client::{Client, ClientOptions, ConnectionConfig};
use pinsub::config::{Settings, load_config};
use pinsub::gpio::{MockPin, PinCommand, PinOperator};
use pinsub::utils::logging::{self, TracingSink};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    let log_file = match logging::init_with_settings(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            logging::init(&settings.logging.level);
            error!("Failed to open log file, logging to console only: {}", e);
            None
        }
    };

    if let Err(e) = run(settings).await {
        error!("Controller failed: {}", e);
    }

    if let Some(guard) = log_file {
        let dropped = guard.dropped_lines();
        if dropped > 0 {
            warn!("Logger dropped {} messages", dropped);
        }
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let mut pin = MockPin::new();
    if let Err(e) = pin.open() {
        error!("Failed to open pin operator: {}", e);
    }
    pin.set_output_pin(settings.gpio.pin);
    let pin = Arc::new(Mutex::new(pin));

    let config = ConnectionConfig::from(&settings.mqtt);
    let options = ClientOptions::from(&settings.mqtt);
    let client = Client::connect_mqtt(config, options, Arc::new(TracingSink))?;

    let handler_pin = pin.clone();
    client.set_message_callback(move |message| {
        // Deliveries may overlap; the lock serializes access to the pin.
        let mut pin = handler_pin.lock().unwrap_or_else(PoisonError::into_inner);
        info!(
            "Received message: {}",
            String::from_utf8_lossy(&message.payload)
        );

        if let Some(command) = PinCommand::parse(&message.payload) {
            command.apply(&mut *pin);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");

    client.close().await;

    let mut pin = pin.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = pin.close() {
        error!("Failed to close pin operator: {}", e);
    }

    Ok(())
}
