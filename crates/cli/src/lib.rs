//! CLI for the group shell multiplexer.
//!
//! Responsibilities:
//! - Parse the process-level invocation (hosts, a startup `-c` command, an
//!   optional config path).
//! - Drive the engine's poll loop, reading operator lines off stdin in the
//!   very same `poll()` call so a blocked terminal read never starves
//!   remote output.
//! - Parse `:`-prefixed lines as control commands; broadcast everything
//!   else verbatim to every enabled shell.

pub mod args;
pub mod commands;
pub mod echo_guard;
pub mod select;

use std::io::{self, BufRead};
use std::os::fd::{AsFd, AsRawFd};
use std::path::PathBuf;
use std::time::Duration;

use echo_guard::EchoGuard;

use clap::Parser;

use groupshell_core::config::{self, Config};
use groupshell_core::engine::{EngineContext, EventLoop};
use groupshell_core::logging;

use args::{Cli, ControlLine};

const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Parse argv, wire up the engine, and run until `:quit` or a fatal error.
/// Returns the process exit code (spec.md "Exit codes": 0 normal, 1 on
/// `abort_error` during startup).
pub fn run() -> i32 {
  let cli = Cli::parse();

  let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("groupshell.toml"));
  let cfg = match config::load(&config_path) {
    Ok(cfg) => cfg,
    Err(err) => {
      eprintln!("groupshell: failed to load {}: {err}", config_path.display());
      return 1;
    }
  };

  logging::init(&PathBuf::from(".groupshell/logs.jsonl"), cfg.log_level);

  let mut ctx = EngineContext::new(cfg);
  for host in &cli.hosts {
    if let Err(err) = ctx.add(host, cli.command.clone()) {
      eprintln!("groupshell: failed to connect to {host}: {err}");
    }
  }

  run_loop(&mut ctx)
}

/// The driven part of `run`, split out so tests can exercise it against a
/// pre-populated `EngineContext` without going through argv/stdin.
fn run_loop(ctx: &mut EngineContext) -> i32 {
  let mut event_loop = EventLoop::new();
  let stdin = io::stdin();
  let stdin_fd = stdin.as_raw_fd();
  let mut lines = stdin.lock();
  let mut pending_echo_guard: Option<EchoGuard<'_>> = None;

  loop {
    let (_, stdin_ready) = match event_loop.step_with_extra(ctx, Some(stdin_fd), POLL_TIMEOUT) {
      Ok(result) => result,
      Err(err) => {
        eprintln!("groupshell: engine error: {err}");
        return 1;
      }
    };

    if ctx.take_abort_requested() {
      return 1;
    }

    if !stdin_ready {
      continue;
    }

    let mut raw = String::new();
    let n = match lines.read_line(&mut raw) {
      Ok(n) => n,
      Err(err) => {
        eprintln!("groupshell: stdin error: {err}");
        return 1;
      }
    };
    if n == 0 {
      // EOF on the controlling terminal: behave like an explicit `:quit`.
      ctx.quit_all();
      return 0;
    }
    let line = raw.trim_end_matches(['\n', '\r']);
    // Echo suppression only ever covers the one line right after
    // `:hide-password`; release it now that line has been read.
    pending_echo_guard = None;
    if line.is_empty() {
      continue;
    }

    match dispatch_line(ctx, line) {
      Ok(commands::Outcome::Continue(Some(text))) => println!("{text}"),
      Ok(commands::Outcome::Continue(None)) => {}
      Ok(commands::Outcome::SuppressNextEcho) => {
        pending_echo_guard = EchoGuard::suppress(stdin.as_fd()).ok();
      }
      Ok(commands::Outcome::Quit) => return 0,
      Err(err) => eprintln!("groupshell: {err}"),
    }

    if ctx.take_abort_requested() {
      return 1;
    }
  }
}

/// `:`-prefixed lines are control commands; everything else is broadcast
/// verbatim to every enabled, active shell.
fn dispatch_line(ctx: &mut EngineContext, line: &str) -> anyhow::Result<commands::Outcome> {
  match line.strip_prefix(':') {
    Some(rest) => {
      let tokens = rest.split_whitespace().collect::<Vec<_>>();
      let control = ControlLine::try_parse_from(tokens)?;
      commands::execute(ctx, control.command)
    }
    None => {
      ctx.broadcast_command(line)?;
      Ok(commands::Outcome::Continue(None))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.transport_template = "printf 'hello\\n'".to_string();
    cfg
  }

  #[test]
  fn broadcast_line_reaches_every_enabled_shell() {
    let mut ctx = EngineContext::new(test_config());
    ctx.add("a", None).unwrap();
    let outcome = dispatch_line(&mut ctx, "echo hi").unwrap();
    assert!(matches!(outcome, commands::Outcome::Continue(None)));
  }

  #[test]
  fn control_line_is_parsed_and_dispatched() {
    let mut ctx = EngineContext::new(test_config());
    ctx.add("a", None).unwrap();
    let commands::Outcome::Continue(Some(text)) = dispatch_line(&mut ctx, ":list").unwrap() else {
      panic!("expected list output");
    };
    assert!(text.contains('a'));
  }

  #[test]
  fn malformed_control_line_is_an_error_not_a_panic() {
    let mut ctx = EngineContext::new(test_config());
    assert!(dispatch_line(&mut ctx, ":not-a-real-command").is_err());
  }

  #[test]
  fn quit_control_line_reports_quit() {
    let mut ctx = EngineContext::new(test_config());
    ctx.add("a", None).unwrap();
    let outcome = dispatch_line(&mut ctx, ":quit").unwrap();
    assert!(matches!(outcome, commands::Outcome::Quit));
  }
}
