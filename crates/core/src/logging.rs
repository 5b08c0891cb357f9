use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::OnceLock;

use tracing::{info, subscriber::set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use crate::config::LogLevel;

static WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize structured JSON logging to `logs_path`, appending across runs.
///
/// Idempotent in practice: a second call's `set_global_default` fails silently,
/// matching the one-subscriber-per-process reality of this binary.
pub fn init(logs_path: &Path, level: LogLevel) {
  if let Some(parent) = logs_path.parent() {
    let _ = fs::create_dir_all(parent);
  }

  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(logs_path)
    .expect("open log file for append");

  let (nb_writer, guard) = tracing_appender::non_blocking(file);
  let _ = WORKER_GUARD.set(guard);

  let filter = EnvFilter::new(level.as_filter_str());

  let json_layer = fmt::layer()
    .json()
    .with_current_span(true)
    .with_level(true)
    .with_target(false)
    .with_thread_ids(false)
    .with_writer(move || nb_writer.clone());

  let subscriber = Registry::default().with(filter).with(json_layer);
  let _ = set_global_default(subscriber);

  info!(event = "logging_initialized", logs_path = %logs_path.display(), level = ?level, "logging initialized");
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{thread, time::Duration};
  use tracing::info;

  #[test]
  fn writes_json_logs() {
    let td = tempfile::tempdir().unwrap();
    let log = td.path().join("logs.jsonl");

    init(&log, LogLevel::Info);
    info!(answer = 42, "hello world");

    thread::sleep(Duration::from_millis(50));

    let s = fs::read_to_string(&log).expect("read logs");
    assert!(s.lines().count() >= 1, "no log lines written");
    assert!(s.contains("hello world"));
  }
}
