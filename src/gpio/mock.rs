use tracing::info;

use super::PinOperator;
use crate::utils::error::PinError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    High,
    Low,
}

/// Pin controller that only logs and remembers what it was told.
#[derive(Debug)]
pub struct MockPin {
    name: String,
    pin: Option<u8>,
    level: Option<PinLevel>,
    open: bool,
}

impl MockPin {
    pub fn new() -> Self {
        Self {
            name: "Mock GPIO Controller".to_string(),
            pin: None,
            level: None,
            open: false,
        }
    }

    pub fn pin(&self) -> Option<u8> {
        self.pin
    }

    /// Last level set, `None` until the first command.
    pub fn level(&self) -> Option<PinLevel> {
        self.level
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn set_level(&mut self, level: PinLevel) {
        info!("{}: GPIO pin {:?} set to {:?}", self.name, self.pin, level);
        self.level = Some(level);
    }
}

impl Default for MockPin {
    fn default() -> Self {
        Self::new()
    }
}

impl PinOperator for MockPin {
    fn open(&mut self) -> Result<(), PinError> {
        info!("{}: Opening GPIO pin controller", self.name);
        self.open = true;
        info!("{}: GPIO pin controller open", self.name);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PinError> {
        if !self.open {
            return Err(PinError::NotOpen);
        }
        info!("{}: Closing GPIO pin controller", self.name);
        self.open = false;
        info!("{}: GPIO pin controller closed", self.name);
        Ok(())
    }

    fn set_output_pin(&mut self, pin: u8) {
        info!("{}: Setting GPIO pin {} as output", self.name, pin);
        self.pin = Some(pin);
    }

    fn set_high(&mut self) {
        self.set_level(PinLevel::High);
    }

    fn set_low(&mut self) {
        self.set_level(PinLevel::Low);
    }
}
