mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{GpioSettings, LoggingSettings, MqttSettings, Settings};

/// Prefix for environment overrides, e.g. `PINSUB__MQTT__BROKER`.
pub const ENV_PREFIX: &str = "PINSUB";

/// Loads the configuration from `config/default` and environment variables.
/// Missing values are filled from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(Path::new("config/default"))
}

/// Same as [`load_config`] with an explicit base file (extension optional).
pub fn load_config_from(path: &Path) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    Ok(Settings {
        mqtt: partial.mqtt.unwrap_or_default().merge(default.mqtt),
        logging: partial.logging.unwrap_or_default().merge(default.logging),
        gpio: GpioSettings {
            pin: partial
                .gpio
                .and_then(|g| g.pin)
                .unwrap_or(default.gpio.pin),
        },
    })
}
