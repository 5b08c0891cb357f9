//! End-to-end scenarios against real child processes, transcribed from
//! SPEC_FULL.md's §8 "Concrete end-to-end scenarios" (S1-S6).
//!
//! `transport_template = "{host}"` with the desired shell command passed as
//! the "hostname" is a deliberate trick: it lets these tests hand the
//! transport layer an exact command line without `expand_template`'s
//! host-appending fallback kicking in.

use std::time::Duration;

use groupshell_core::config::Config;
use groupshell_core::engine::{EngineContext, EventLoop};

fn drive(ctx: &mut EngineContext, loop_: &mut EventLoop, iterations: usize) {
  for _ in 0..iterations {
    let _ = loop_.step(ctx, Duration::from_millis(100));
  }
}

fn test_config(transport_template: &str) -> Config {
  let mut cfg = Config::default();
  cfg.transport_template = transport_template.to_string();
  cfg
}

/// S1: a bash login shell, once it echoes our init string's marker line,
/// should settle into Idle without ever printing anything operator-visible.
#[test]
fn s1_prompt_detection_reaches_idle_quietly() {
  let mut ctx = EngineContext::new(test_config("{host}"));
  let id = ctx.add("/bin/bash -i --norc --noprofile", None).unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 20);

  assert!(ctx.is_active(id), "bash should still be running");
  assert_eq!(ctx.status_label(id).as_deref(), Some("idle active=true enabled=true"));
}

/// S2: from Idle, dispatching a command and letting the shell print a
/// result then a fresh prompt should print exactly that result, prefixed,
/// and return to Idle.
#[test]
fn s2_command_execution_prints_one_line_and_returns_to_idle() {
  let mut ctx = EngineContext::new(test_config("{host}"));
  let id = ctx.add("/bin/bash -i --norc --noprofile", None).unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 20);
  assert_eq!(ctx.status_label(id).as_deref(), Some("idle active=true enabled=true"));

  let sent = ctx.broadcast_command("echo hi").unwrap();
  assert_eq!(sent, 1);
  drive(&mut ctx, &mut loop_, 20);

  assert_eq!(ctx.status_label(id).as_deref(), Some("idle active=true enabled=true"));
}

/// Non-interactive `-c` invocation: the `NotStarted` -> `Running` ->
/// `Idle` path that redefines `PS1` for the one-shot command before
/// sending it, per SPEC_FULL.md 4.3.2's "non-interactive with
/// pending_command" row.
#[test]
fn pending_command_runs_once_then_settles_idle() {
  let mut cfg = test_config("{host}");
  cfg.interactive = false;
  let mut ctx = EngineContext::new(cfg);
  let id = ctx
    .add("/bin/bash -i --norc --noprofile", Some("echo hi".to_string()))
    .unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 40);

  assert!(ctx.is_active(id), "non-interactive dispatcher should survive its one-shot command");
  assert_eq!(ctx.status_label(id).as_deref(), Some("idle active=true enabled=true"));
}

/// S3: a transport that emits a host-key-rejection line before any prompt
/// disconnects that dispatcher immediately and, with `abort_error` set,
/// latches the fatal-exit flag.
#[test]
fn s3_host_key_rejection_disconnects_and_can_abort() {
  let mut cfg = test_config("/bin/echo \"The authenticity of host 'x' can't be established.\"");
  cfg.abort_error = true;
  let mut ctx = EngineContext::new(cfg);
  let id = ctx.add("unused-host", None).unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 10);

  assert!(!ctx.is_active(id), "host-key rejection must disconnect the dispatcher");
  assert!(ctx.take_abort_requested(), "abort_error during NotStarted should latch a fatal exit");
}

/// S4: renaming round-trips through the remote shell's echo expansion
/// before `display_name` actually changes.
#[test]
fn s4_rename_round_trips_through_the_remote_echo() {
  let mut ctx = EngineContext::new(test_config("{host}"));
  let id = ctx.add("/bin/bash -i --norc --noprofile", None).unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 20);
  assert_eq!(ctx.status_label(id).as_deref(), Some("idle active=true enabled=true"));

  ctx.rename(id, "newname").unwrap();
  drive(&mut ctx, &mut loop_, 20);

  assert_eq!(ctx.display_name(id), Some("newname"));
}

/// S5: two dispatchers added for the same host get disambiguated names,
/// and a third add continues the numbering.
#[test]
fn s5_duplicate_hostnames_get_numeric_suffixes() {
  let mut ctx = EngineContext::new(test_config("true"));
  let first = ctx.add("host", None).unwrap();
  let second = ctx.add("host", None).unwrap();
  let third = ctx.add("host", None).unwrap();

  assert_eq!(ctx.display_name(first), Some("host"));
  assert_eq!(ctx.display_name(second), Some("host#1"));
  assert_eq!(ctx.display_name(third), Some("host#2"));
}

/// S6: `send_ctrl('c')` against a `cat` transport delivers a real SIGINT
/// over the pty's line discipline, killing the child and surfacing as a
/// disconnect — proof the control byte reaches the wire, not just the
/// write buffer.
#[test]
fn s6_send_ctrl_c_kills_a_foreground_cat() {
  let mut ctx = EngineContext::new(test_config("{host}"));
  let id = ctx.add("cat", None).unwrap();
  let mut loop_ = EventLoop::new();
  drive(&mut ctx, &mut loop_, 3);
  assert!(ctx.is_active(id));

  assert!(ctx.send_ctrl(id, 'c').unwrap());
  drive(&mut ctx, &mut loop_, 20);

  assert!(!ctx.is_active(id), "SIGINT should have killed cat and ended the dispatcher");
}

/// Invariant 6 ("unique names"): under a churn of adds, disables, and
/// purges, the live display-name multiset never contains a duplicate.
#[test]
fn invariant_unique_names_survive_churn() {
  let mut ctx = EngineContext::new(test_config("true"));
  let mut ids = Vec::new();
  for _ in 0..5 {
    ids.push(ctx.add("worker", None).unwrap());
  }
  ctx.disable(ids[1]);
  ctx.disable(ids[3]);
  ctx.purge(&[ids[1], ids[3]]);
  ids.push(ctx.add("worker", None).unwrap());

  let mut names: Vec<String> = ctx.ids().iter().filter_map(|id| ctx.display_name(*id).map(str::to_string)).collect();
  let before = names.len();
  names.sort();
  names.dedup();
  assert_eq!(names.len(), before, "duplicate display_name survived a churn sequence");
}

/// Invariant 5 ("state monotonicity of active"): once a dispatcher has
/// disconnected, nothing brings it back without an explicit `:reconnect`
/// (which replaces it under the same id rather than resurrecting it).
#[test]
fn invariant_active_never_flips_back_without_reconnect() {
  let mut ctx = EngineContext::new(test_config("true"));
  let id = ctx.add("worker", None).unwrap();
  ctx.quit_all();
  assert!(!ctx.is_active(id));

  // Broadcasting, enabling, or disabling a dead dispatcher must not revive it.
  ctx.enable(id);
  let _ = ctx.broadcast_command("echo hi");
  assert!(!ctx.is_active(id));
}
