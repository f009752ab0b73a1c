//! The `gpio` module defines the output-pin contract driven by inbound
//! messages, along with the commands a message payload can carry.
//!
//! Only a logging mock is provided; the electrical side of a pin is left to
//! whatever implements [`PinOperator`].

pub mod mock;

pub use mock::{MockPin, PinLevel};

use crate::utils::error::PinError;

/// Output-pin controller.
pub trait PinOperator: Send {
    fn open(&mut self) -> Result<(), PinError>;
    fn close(&mut self) -> Result<(), PinError>;
    fn set_output_pin(&mut self, pin: u8);
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// Command carried in an inbound message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCommand {
    SetHigh,
    SetLow,
}

impl PinCommand {
    /// Matches the payload exactly; anything else is not a command.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"SetHigh" => Some(PinCommand::SetHigh),
            b"SetLow" => Some(PinCommand::SetLow),
            _ => None,
        }
    }

    pub fn apply(self, pin: &mut dyn PinOperator) {
        match self {
            PinCommand::SetHigh => pin.set_high(),
            PinCommand::SetLow => pin.set_low(),
        }
    }
}
