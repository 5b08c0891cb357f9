//! The engine: C1-C5 wired together behind a facade the CLI layer drives.
//!
//! Grounded on `crates/agency/src/pty/mod.rs`'s top-level session-manager
//! shape, generalized from "one pty" to "a registry of many".

pub mod callbacks;
pub mod dispatcher;
pub mod event_loop;
pub mod io;
pub mod registry;
pub mod transport;

use crate::config::Config;
use crate::error::Result;

pub use callbacks::DispatcherId;
pub use dispatcher::{DispatcherEvent, DispatcherState, RemoteDispatcher};
pub use event_loop::EventLoop;

use callbacks::CallbackRegistry;
use registry::DispatcherRegistry;

/// Owns C2 (callback registry) and C4 (dispatcher registry) plus the config
/// that parameterizes spawning. One instance per running `groupshell`
/// process — not a global, per the explicit-context redesign (Open
/// Question ii).
pub struct EngineContext {
  pub(crate) callbacks: CallbackRegistry,
  pub(crate) registry: DispatcherRegistry,
  pub config: Config,
  handle_read_count: u64,
  abort_requested: bool,
}

impl EngineContext {
  pub fn new(config: Config) -> Self {
    Self {
      callbacks: CallbackRegistry::new(),
      registry: DispatcherRegistry::new(),
      config,
      handle_read_count: 0,
      abort_requested: false,
    }
  }

  /// `true` once some dispatcher has died during startup with
  /// `config.abort_error` set — the caller should unwind with exit code 1
  /// (spec.md "Exit codes"). Cleared on read so it only fires once.
  pub fn take_abort_requested(&mut self) -> bool {
    std::mem::take(&mut self.abort_requested)
  }

  pub fn handle_read_count(&self) -> u64 {
    self.handle_read_count
  }

  pub fn is_empty(&self) -> bool {
    self.registry.is_empty()
  }

  pub fn ids(&self) -> Vec<DispatcherId> {
    self.registry.all_instances().map(|d| d.id()).collect()
  }

  pub fn display_name(&self, id: DispatcherId) -> Option<&str> {
    self.registry.all_instances().find(|d| d.id() == id).map(|d| d.display_name())
  }

  pub fn hostname(&self, id: DispatcherId) -> Option<&str> {
    self.registry.all_instances().find(|d| d.id() == id).map(|d| d.hostname())
  }

  pub fn is_enabled(&self, id: DispatcherId) -> bool {
    self.registry.all_instances().any(|d| d.id() == id && d.enabled())
  }

  pub fn is_active(&self, id: DispatcherId) -> bool {
    self.registry.all_instances().any(|d| d.id() == id && d.active())
  }

  /// `"idle active=true enabled=true"`-style status text for one dispatcher,
  /// used by `:list` and handy for introspection in tests.
  pub fn status_label(&self, id: DispatcherId) -> Option<String> {
    self.registry.all_instances().find(|d| d.id() == id).map(|d| d.status_label())
  }

  pub fn format_info(&self) -> String {
    self.registry.format_info()
  }

  /// Pretty-print just the given ids, column aligned among themselves —
  /// used by `:list PATTERNS...` to report a filtered subset.
  pub fn format_selected(&self, ids: &[DispatcherId]) -> String {
    let width = ids
      .iter()
      .filter_map(|id| self.display_name(*id))
      .map(str::len)
      .max()
      .unwrap_or(0);
    ids
      .iter()
      .filter_map(|id| {
        let name = self.display_name(*id)?;
        Some(format!(
          "{:width$}  active={} enabled={}",
          name,
          self.is_active(*id),
          self.is_enabled(*id),
          width = width
        ))
      })
      .collect::<Vec<_>>()
      .join("\n")
  }

  /// `:add HOST...` — spawn one dispatcher per host.
  pub fn add(&mut self, hostname: &str, pending_command: Option<String>) -> Result<DispatcherId> {
    let id = self.registry.alloc_id();
    let unique_name = self.registry.make_unique_name(hostname);
    let dispatcher = RemoteDispatcher::spawn(
      id,
      hostname,
      unique_name,
      &self.config.transport_template,
      self.config.interactive,
      pending_command,
      &mut self.callbacks,
    )?;
    self.registry.insert(dispatcher, self.config.interactive);
    self.sync_width();
    Ok(id)
  }

  /// `:chdir PATH` — changes this process's own working directory, not the
  /// remote shells' (mirrors the reference's `do_chdir`).
  pub fn chdir(&self, path: &std::path::Path) -> std::io::Result<()> {
    std::env::set_current_dir(path)
  }

  /// `:quit` — disconnect every live dispatcher; the caller then stops the
  /// event loop.
  pub fn quit_all(&mut self) {
    for d in self.registry.all_instances_mut() {
      d.disconnect(&mut self.callbacks);
    }
    self.sync_width();
  }

  pub fn send_ctrl(&mut self, id: DispatcherId, letter: char) -> Result<bool> {
    match self.registry.get_mut(id) {
      Some(d) if d.enabled() => d.send_ctrl(letter),
      _ => Ok(false),
    }
  }

  pub fn reset_prompt(&mut self, id: DispatcherId) -> Result<bool> {
    match self.registry.get_mut(id) {
      Some(d) if d.enabled() => d.reset_prompt(),
      _ => Ok(false),
    }
  }

  pub fn enable(&mut self, id: DispatcherId) {
    if let Some(d) = self.registry.get_mut(id) {
      if d.active() {
        d.set_enabled(true);
      }
    }
    self.sync_width();
  }

  pub fn disable(&mut self, id: DispatcherId) {
    if let Some(d) = self.registry.get_mut(id) {
      d.set_enabled(false);
    }
    self.sync_width();
  }

  /// `:reconnect` — only meaningful for a dead (`!active`) entry; replaces
  /// it in place with a freshly spawned one under the same id.
  pub fn reconnect(&mut self, id: DispatcherId) -> Result<bool> {
    let Some((hostname, was_active)) = self
      .registry
      .all_instances()
      .find(|d| d.id() == id)
      .map(|d| (d.hostname().to_string(), d.active()))
    else {
      return Ok(false);
    };
    if was_active {
      return Ok(false);
    }
    let unique_name = self.registry.make_unique_name(&hostname);
    let dispatcher = RemoteDispatcher::spawn(
      id,
      &hostname,
      unique_name,
      &self.config.transport_template,
      self.config.interactive,
      None,
      &mut self.callbacks,
    )?;
    self.registry.replace(id, dispatcher);
    self.sync_width();
    Ok(true)
  }

  /// `:purge` — drop every dispatcher in `ids` that is currently disabled.
  pub fn purge(&mut self, ids: &[DispatcherId]) {
    let to_delete: Vec<DispatcherId> = ids
      .iter()
      .copied()
      .filter(|id| !self.is_enabled(*id))
      .collect();
    for id in &to_delete {
      if let Some(d) = self.registry.get_mut(*id) {
        d.disconnect(&mut self.callbacks);
      }
    }
    self.registry.remove_where(&to_delete);
    self.sync_width();
  }

  /// `:rename` — a non-empty name only becomes visible once the remote
  /// shell's expansion round-trips through a `DispatcherEvent::RenameEchoed`
  /// (see `drive_readable`). An empty name resets to the hostname
  /// immediately, deduped against the registry the same way a fresh `:add`
  /// is, so resetting never reintroduces a duplicate `display_name`.
  pub fn rename(&mut self, id: DispatcherId, new_name: &str) -> Result<()> {
    if new_name.is_empty() {
      let hostname = self.registry.get_mut(id).map(|d| d.hostname().to_string());
      if let Some(hostname) = hostname {
        let unique = self.registry.make_unique_name(&hostname);
        if let Some(d) = self.registry.get_mut(id) {
          d.set_display_name(unique);
        }
        self.sync_width();
      }
      return Ok(());
    }
    if let Some(d) = self.registry.get_mut(id) {
      d.rename(new_name, &mut self.callbacks)?;
    }
    Ok(())
  }

  /// `:set_debug` over an explicit id set.
  pub fn set_debug(&mut self, ids: &[DispatcherId], value: bool) {
    for id in ids {
      if let Some(d) = self.registry.get_mut(*id) {
        d.debug = value;
      }
    }
  }

  /// `:hide_password` — silently disables debug tracing on every enabled,
  /// debugging dispatcher so a typed password is never echoed into logs.
  /// Suppressing local terminal echo itself is the CLI layer's job (an
  /// `EchoGuard`, Open Question iii).
  pub fn hide_password(&mut self) -> usize {
    let mut disabled = 0;
    for d in self.registry.all_instances_mut() {
      if d.enabled() && d.debug {
        d.debug = false;
        disabled += 1;
      }
    }
    disabled
  }

  /// `:export_rank` — assign each enabled shell a 0-based `GSH_RANK` and
  /// broadcast the shared `GSH_NR_SHELLS` count.
  pub fn export_rank(&mut self) -> Result<usize> {
    let mut rank = 0usize;
    for d in self.registry.all_instances_mut() {
      if d.enabled() {
        d.dispatch_write(format!("export GSH_RANK={rank}\n").as_bytes())?;
        rank += 1;
      }
    }
    for d in self.registry.all_instances_mut() {
      if d.enabled() {
        d.dispatch_write(format!("export GSH_NR_SHELLS={rank}\n").as_bytes())?;
      }
    }
    Ok(rank)
  }

  /// `dispatch_command` to every enabled, active dispatcher — the
  /// operator-typed-a-line broadcast path.
  pub fn broadcast_command(&mut self, line: &str) -> Result<usize> {
    let mut sent = 0;
    for d in self.registry.all_instances_mut() {
      if d.active() && d.enabled() && d.dispatch_command(line.as_bytes())? {
        sent += 1;
      }
    }
    Ok(sent)
  }

  fn sync_width(&mut self) {
    self.registry.update_max_display_name_length(self.config.interactive);
    let width = self.registry.max_display_name_length();
    for d in self.registry.all_instances_mut() {
      d.set_max_display_name_length(width);
    }
  }

  pub(crate) fn note_handle_read(&mut self) {
    self.handle_read_count += 1;
  }

  /// Apply the registry-side fallout of one dispatcher's readiness event:
  /// dedupe a renamed display name and/or recompute the cached width.
  pub(crate) fn apply_event(&mut self, id: DispatcherId, event: DispatcherEvent) {
    match event {
      DispatcherEvent::RenameEchoed(new_name) => {
        let unique = self.registry.make_unique_name(&new_name);
        if let Some(d) = self.registry.get_mut(id) {
          d.set_display_name(unique);
        }
        self.sync_width();
      }
      DispatcherEvent::Disconnected { was_starting } => {
        if was_starting && self.config.abort_error {
          self.abort_requested = true;
        }
        self.sync_width();
      }
      DispatcherEvent::None => {}
    }
  }
}
