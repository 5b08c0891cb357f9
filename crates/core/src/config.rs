use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Log level for the engine and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  pub fn as_filter_str(self) -> &'static str {
    match self {
      LogLevel::Off => "off",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

/// Effective configuration after merging defaults with an optional project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub log_level: LogLevel,
  /// Transport command template; `{host}` is substituted, or the host is
  /// appended if the placeholder is absent.
  pub transport_template: String,
  /// Exit with code 1 if a dispatcher dies while still `NotStarted`.
  pub abort_error: bool,
  /// Interactive mode affects how `max_display_name_length` and the
  /// NotStarted->no-command transition behave.
  pub interactive: bool,
  pub debug: bool,
  /// How long a trailing, newline-less partial line may sit in the read
  /// buffer before `print_unfinished_line` flushes it anyway.
  #[serde(with = "duration_millis")]
  pub idle_flush: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      transport_template: "ssh {host}".to_string(),
      abort_error: false,
      interactive: true,
      debug: false,
      idle_flush: Duration::from_millis(500),
    }
  }
}

mod duration_millis {
  use super::Duration;
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load a project config from `path`. A missing file yields `Config::default`;
/// a present-but-malformed file is an error.
pub fn load(path: &Path) -> Result<Config> {
  match std::fs::read_to_string(path) {
    Ok(contents) => Ok(toml::from_str(&contents)?),
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
    Err(err) => Err(err.into()),
  }
}
