use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker connection, logging and the output pin.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub logging: LoggingSettings,
    pub gpio: GpioSettings,
}

/// Broker connection and client tuning.
///
/// An empty `client_id` means one is generated at startup; an empty
/// `username` means no credentials are sent.
#[derive(Debug, Deserialize, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub queue_capacity: usize,
    pub keep_alive_secs: u64,
    pub retry_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub ack_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

/// Console logging plus an optional rolling log file.
///
/// An empty `file_path` disables the file. `rotation` is one of `minutely`,
/// `hourly`, `daily` or `never`; `max_files` bounds how many rotated files are
/// kept (0 keeps all). `buffer_lines` is the capacity of the in-memory buffer
/// in front of the file; lines beyond it are dropped and counted.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub file_path: String,
    pub rotation: String,
    pub max_files: usize,
    pub buffer_lines: usize,
}

/// Output pin driven by inbound commands.
#[derive(Debug, Deserialize, Clone)]
pub struct GpioSettings {
    pub pin: u8,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub mqtt: Option<PartialMqttSettings>,
    pub logging: Option<PartialLoggingSettings>,
    pub gpio: Option<PartialGpioSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMqttSettings {
    pub broker: Option<String>,
    pub topic: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub queue_capacity: Option<usize>,
    pub keep_alive_secs: Option<u64>,
    pub retry_interval_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub ack_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub file_path: Option<String>,
    pub rotation: Option<String>,
    pub max_files: Option<usize>,
    pub buffer_lines: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialGpioSettings {
    pub pin: Option<u8>,
}

impl PartialMqttSettings {
    pub fn merge(self, default: MqttSettings) -> MqttSettings {
        MqttSettings {
            broker: self.broker.unwrap_or(default.broker),
            topic: self.topic.unwrap_or(default.topic),
            client_id: self.client_id.unwrap_or(default.client_id),
            username: self.username.unwrap_or(default.username),
            password: self.password.unwrap_or(default.password),
            queue_capacity: self.queue_capacity.unwrap_or(default.queue_capacity),
            keep_alive_secs: self.keep_alive_secs.unwrap_or(default.keep_alive_secs),
            retry_interval_secs: self
                .retry_interval_secs
                .unwrap_or(default.retry_interval_secs),
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(default.connect_timeout_secs),
            ack_timeout_secs: self.ack_timeout_secs.unwrap_or(default.ack_timeout_secs),
            shutdown_timeout_secs: self
                .shutdown_timeout_secs
                .unwrap_or(default.shutdown_timeout_secs),
        }
    }
}

impl PartialLoggingSettings {
    pub fn merge(self, default: LoggingSettings) -> LoggingSettings {
        LoggingSettings {
            level: self.level.unwrap_or(default.level),
            file_path: self.file_path.unwrap_or(default.file_path),
            rotation: self.rotation.unwrap_or(default.rotation),
            max_files: self.max_files.unwrap_or(default.max_files),
            buffer_lines: self.buffer_lines.unwrap_or(default.buffer_lines),
        }
    }
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: "tcp://localhost:1883".to_string(),
            topic: "boiler_pin_state".to_string(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            queue_capacity: 100,
            keep_alive_secs: 10,
            retry_interval_secs: 5,
            connect_timeout_secs: 30,
            ack_timeout_secs: 10,
            shutdown_timeout_secs: 5,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: String::new(),
            rotation: "daily".to_string(),
            max_files: 3,
            buffer_lines: 1000,
        }
    }
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self { pin: 10 }
    }
}
