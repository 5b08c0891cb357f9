//! C3: the remote dispatcher.
//!
//! Ground truth: `original_source/gsh/remote_dispatcher.py` in full — the
//! state table, `print_lines`, the fast/slow read split, host-key
//! rejection, renaming, and control-byte injection are all transcribed from
//! there into the idiom of this crate's dependency stack.

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use crate::error::Result;

use super::callbacks::{CallbackRegistry, DispatcherId};
use super::io::PtyChannel;
use super::transport::{self, SpawnedTransport};

const HOST_KEY_REJECTIONS: &[&str] = &[
  "The authenticity of host",
  "REMOTE HOST IDENTIFICATION HAS CHANGED",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
  NotStarted,
  Idle,
  Running,
  Terminated,
}

/// What happened during a read that the caller (which alone holds a
/// `&mut EngineContext`, including the dispatcher registry) must finish
/// handling — renaming needs a uniqueness check, and both renaming and
/// disconnection invalidate the cached max display-name width.
pub enum DispatcherEvent {
  None,
  RenameEchoed(String),
  /// `was_starting` lets the engine apply the `abort_error` config option,
  /// which only fires for failures seen before the first prompt.
  Disconnected { was_starting: bool },
}

pub struct RemoteDispatcher {
  id: DispatcherId,
  hostname: String,
  display_name: String,
  transport: Option<SpawnedTransport>,
  channel: PtyChannel,
  state: DispatcherState,
  active: bool,
  enabled: bool,
  pub debug: bool,
  interactive: bool,
  init_string: String,
  init_string_sent: bool,
  startup_buffer: Vec<u8>,
  pending_command: Option<String>,
  prompt_fired: Rc<Cell<bool>>,
  rename_result: Rc<Cell<Option<Vec<u8>>>>,
  output_sink: Box<dyn Write>,
  cached_max_display_name_length: usize,
}

impl RemoteDispatcher {
  /// Spawn the transport child and build, but do not yet send, the init
  /// string. `display_name` must already have been made unique by the
  /// caller (`DispatcherRegistry::make_unique_name`).
  pub fn spawn(
    id: DispatcherId,
    hostname: &str,
    display_name: String,
    transport_template: &str,
    interactive: bool,
    pending_command: Option<String>,
    callbacks: &mut CallbackRegistry,
  ) -> Result<Self> {
    let transport = transport::spawn(transport_template, hostname)?;
    let channel = PtyChannel::new(transport.master_fd(), display_name.clone())?;

    let prompt_fired = Rc::new(Cell::new(false));
    let flag = prompt_fired.clone();
    let (prefix_half, suffix_half) = callbacks.add(id, true, Box::new(move |_| flag.set(true)));

    let init_string = build_init_string(&prefix_half, &suffix_half);

    Ok(Self {
      id,
      hostname: hostname.to_string(),
      display_name,
      transport: Some(transport),
      channel,
      state: DispatcherState::NotStarted,
      active: true,
      enabled: true,
      debug: false,
      interactive,
      init_string,
      init_string_sent: false,
      startup_buffer: Vec::new(),
      pending_command,
      prompt_fired,
      rename_result: Rc::new(Cell::new(None)),
      output_sink: Box::new(std::io::stdout()),
      cached_max_display_name_length: 0,
    })
  }

  pub fn id(&self) -> DispatcherId {
    self.id
  }

  pub fn hostname(&self) -> &str {
    &self.hostname
  }

  pub fn display_name(&self) -> &str {
    &self.display_name
  }

  pub fn active(&self) -> bool {
    self.active
  }

  pub fn enabled(&self) -> bool {
    self.enabled
  }

  pub fn state(&self) -> DispatcherState {
    self.state
  }

  pub fn init_string(&self) -> &str {
    &self.init_string
  }

  pub fn status_label(&self) -> String {
    let state = match self.state {
      DispatcherState::NotStarted => "not started",
      DispatcherState::Idle => "idle",
      DispatcherState::Running => "running",
      DispatcherState::Terminated => "terminated",
    };
    format!(
      "{} active={} enabled={}",
      state, self.active, self.enabled
    )
  }

  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
  }

  pub fn set_display_name(&mut self, name: String) {
    self.display_name = name;
  }

  #[cfg(test)]
  pub fn set_output_sink(&mut self, sink: Box<dyn Write>) {
    self.output_sink = sink;
  }

  /// Append-only; rejected if not active+enabled.
  pub fn dispatch_write(&mut self, bytes: &[u8]) -> Result<bool> {
    if !self.active || !self.enabled {
      return Ok(false);
    }
    self.channel.dispatch_write(bytes)?;
    Ok(true)
  }

  pub fn dispatch_command(&mut self, bytes: &[u8]) -> Result<bool> {
    let accepted = self.dispatch_write(bytes)?;
    if accepted {
      self.state = DispatcherState::Running;
    }
    Ok(accepted)
  }

  /// Translate `c` to its control byte (`c` -> 0x03, `d` -> 0x04, `z` ->
  /// 0x1A) and write it raw.
  pub fn send_ctrl(&mut self, letter: char) -> Result<bool> {
    let lower = letter.to_ascii_lowercase() as u8;
    let byte = lower.wrapping_sub(b'a').wrapping_add(1);
    self.dispatch_write(&[byte])
  }

  pub fn reset_prompt(&mut self) -> Result<bool> {
    let init = self.init_string.clone();
    self.dispatch_write(init.as_bytes())
  }

  /// A one-shot callback is registered and a shell echo-expansion is
  /// emitted so the final, remote-expanded name comes back through the
  /// callback channel. Resetting to the hostname (empty `new_name`) is
  /// handled by the caller, which alone can dedup the result against the
  /// registry (`DispatcherRegistry::make_unique_name`).
  pub fn rename(&mut self, new_name: &str, callbacks: &mut CallbackRegistry) -> Result<()> {
    let result = self.rename_result.clone();
    let (prefix_half, suffix_half) = callbacks.add(
      self.id,
      false,
      Box::new(move |payload| {
        result.set(Some(payload.to_vec()));
      }),
    );
    let cmd = format!("/bin/echo \"{prefix_half}\"\"{suffix_half}\"{new_name}\n");
    self.dispatch_write(cmd.as_bytes())?;
    Ok(())
  }

  pub fn writable(&self) -> bool {
    self.channel.writable()
  }

  pub fn readable(&self) -> bool {
    self.channel.readable()
  }

  pub fn channel_fd(&self) -> std::os::fd::RawFd {
    self.channel.fd()
  }

  pub fn on_writable(&mut self) -> Result<usize> {
    self.channel.handle_write()
  }

  /// Called once per readiness event. Returns the bookkeeping the caller
  /// (which alone can touch the dispatcher registry) must still finish.
  pub fn on_readable(&mut self, callbacks: &mut CallbackRegistry) -> Result<DispatcherEvent> {
    let new_data = match self.channel.handle_read() {
      Ok(data) => data,
      Err(_) => {
        let was_starting = matches!(self.state, DispatcherState::NotStarted);
        self.disconnect_internal(callbacks);
        return Ok(DispatcherEvent::Disconnected { was_starting });
      }
    };
    if new_data.is_empty() {
      return Ok(DispatcherEvent::None);
    }

    let event = self.process_read_buffer(callbacks);

    if matches!(self.state, DispatcherState::NotStarted) && !self.init_string_sent {
      let init = self.init_string.clone();
      let _ = self.channel.dispatch_write(init.as_bytes());
      self.init_string_sent = true;
    }

    Ok(event)
  }

  fn process_read_buffer(&mut self, callbacks: &mut CallbackRegistry) -> DispatcherEvent {
    // Fast path: running, no callback marker present, at least one full line.
    if matches!(self.state, DispatcherState::Running)
      && !callbacks.any_in(&self.channel.read_buffer)
      && self.channel.read_buffer.contains(&b'\n')
    {
      if let Some(last_nl) = self.channel.read_buffer.iter().rposition(|&b| b == b'\n') {
        let head: Vec<u8> = self.channel.read_buffer.drain(..=last_nl).collect();
        self.print_raw(&head);
      }
      return DispatcherEvent::None;
    }

    // Slow path: line by line.
    let mut event = DispatcherEvent::None;
    loop {
      let Some(nl) = self.channel.read_buffer.iter().position(|&b| b == b'\n') else {
        break;
      };
      let line: Vec<u8> = self.channel.read_buffer.drain(..=nl).collect();
      if let Some(e) = self.handle_line(callbacks, &line) {
        event = e;
      }
      if matches!(event, DispatcherEvent::Disconnected { .. }) {
        break;
      }
    }
    event
  }

  fn handle_line(&mut self, callbacks: &mut CallbackRegistry, line: &[u8]) -> Option<DispatcherEvent> {
    if self.debug {
      tracing::debug!(dispatcher = %self.display_name, line = %String::from_utf8_lossy(line), "line");
    }

    if callbacks.process(line) {
      if self.prompt_fired.take() {
        return self.on_prompt_seen(callbacks);
      }
      if let Some(payload) = self.rename_result.take() {
        let text = String::from_utf8_lossy(&payload);
        let name = text.trim_end_matches('\n').to_string();
        return Some(DispatcherEvent::RenameEchoed(name));
      }
      return None;
    }

    match self.state {
      DispatcherState::Idle | DispatcherState::Running => {
        self.print_raw(line);
        None
      }
      DispatcherState::NotStarted => {
        self.startup_buffer.extend_from_slice(line);
        if contains_host_key_rejection(line) {
          self.print_diagnostic(&String::from_utf8_lossy(line));
          self.disconnect_internal(callbacks);
          Some(DispatcherEvent::Disconnected { was_starting: true })
        } else {
          None
        }
      }
      DispatcherState::Terminated => None,
    }
  }

  fn on_prompt_seen(&mut self, callbacks: &mut CallbackRegistry) -> Option<DispatcherEvent> {
    match self.state {
      DispatcherState::NotStarted => {
        if self.interactive {
          self.startup_buffer.clear();
          self.state = DispatcherState::Idle;
          None
        } else if let Some(cmd) = self.pending_command.take() {
          let flag = self.prompt_fired.clone();
          let (prefix_half, suffix_half) = callbacks.add(self.id, true, Box::new(move |_| flag.set(true)));
          let ps1_line = format!("PS1=\"{prefix_half}\"\"{suffix_half}\\n\"\n");
          let _ = self.channel.dispatch_write(ps1_line.as_bytes());
          let cmd_line = format!("{cmd}\n");
          let _ = self.channel.dispatch_write(cmd_line.as_bytes());
          let init = self.init_string.clone();
          let _ = self.channel.dispatch_write(init.as_bytes());
          self.state = DispatcherState::Running;
          None
        } else {
          self.disconnect_internal(callbacks);
          Some(DispatcherEvent::Disconnected { was_starting: true })
        }
      }
      DispatcherState::Running => {
        self.state = DispatcherState::Idle;
        None
      }
      DispatcherState::Idle | DispatcherState::Terminated => None,
    }
  }

  /// Idempotent: signal the transport child, mark dead, drop buffers, and
  /// release every callback trigger this dispatcher owns.
  pub fn disconnect(&mut self, callbacks: &mut CallbackRegistry) {
    self.disconnect_internal(callbacks);
  }

  fn disconnect_internal(&mut self, callbacks: &mut CallbackRegistry) {
    if !self.active {
      return;
    }
    self.active = false;
    self.enabled = false;
    self.state = DispatcherState::Terminated;
    self.channel.read_buffer.clear();
    self.channel.write_buffer.clear();
    if let Some(mut transport) = self.transport.take() {
      let _ = transport.kill();
    }
    callbacks.drop_owner(self.id);
  }

  fn print_raw(&mut self, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    self.print_lines(&text);
  }

  fn print_lines(&mut self, text: &str) {
    if let Some(block) = format_print_lines(text, &self.display_name, self.max_display_name_length_hint()) {
      let _ = self.output_sink.write_all(block.as_bytes());
    }
  }

  fn print_diagnostic(&mut self, text: &str) {
    let _ = writeln!(self.output_sink, "{}: {text}", self.display_name);
  }

  /// `print_lines` needs the registry's cached max width, but the registry
  /// owns this dispatcher rather than the other way around; callers that
  /// care about correct alignment call `set_max_display_name_length` right
  /// after any registry-affecting change (see `engine::mod` driver code).
  fn max_display_name_length_hint(&self) -> usize {
    self.cached_max_display_name_length
  }

  /// Flush a partial trailing line (no `\n` yet) after a quiescent period,
  /// e.g. a progress bar. Obeys the same callback-then-print split as a
  /// complete line would.
  pub fn flush_stale_partial_line(&mut self, callbacks: &mut CallbackRegistry) -> Option<DispatcherEvent> {
    if self.channel.read_buffer.is_empty() {
      return None;
    }
    let line = std::mem::take(&mut self.channel.read_buffer);
    self.handle_line(callbacks, &line)
  }

  pub fn set_max_display_name_length(&mut self, width: usize) {
    self.cached_max_display_name_length = width;
  }

  /// Non-blocking `waitpid(WNOHANG)`-equivalent reap. The engine never
  /// blocks on a transport child, but a child that has already exited on
  /// its own (rather than via our `kill()`) still needs reaping each loop
  /// iteration or it accumulates as a zombie.
  pub fn reap_if_exited(&mut self, callbacks: &mut CallbackRegistry) -> Option<DispatcherEvent> {
    if !self.active {
      return None;
    }
    let exited = matches!(self.transport.as_mut()?.try_wait(), Ok(Some(_)));
    if !exited {
      return None;
    }
    let was_starting = matches!(self.state, DispatcherState::NotStarted);
    self.disconnect_internal(callbacks);
    Some(DispatcherEvent::Disconnected { was_starting })
  }
}

fn contains_host_key_rejection(line: &[u8]) -> bool {
  let text = String::from_utf8_lossy(line);
  HOST_KEY_REJECTIONS.iter().any(|needle| text.contains(needle))
}

fn build_init_string(prefix_half: &str, suffix_half: &str) -> String {
  format!(
    "unsetopt zle 2> /dev/null;stty -echo -onlcr;\nRPS1=;RPROMPT=;TERM=ansi;unset HISTFILE;\nPS1=\"{prefix_half}\"\"{suffix_half}\\n\"\n"
  )
}

/// Strip a trailing newline, collapse runs of blank lines to a fixpoint,
/// then prefix every remaining line with `display_name<pad>: `.
pub fn format_print_lines(text: &str, display_name: &str, max_display_name_length: usize) -> Option<String> {
  let stripped = text.strip_suffix('\n').unwrap_or(text);
  if stripped.is_empty() {
    return None;
  }
  let mut collapsed = stripped.to_string();
  loop {
    let next = collapsed.replace("\n\n", "\n");
    if next == collapsed {
      break;
    }
    collapsed = next;
  }
  if collapsed.is_empty() {
    return None;
  }

  let pad = max_display_name_length.saturating_sub(display_name.len());
  let padding = " ".repeat(pad);
  let mut out = String::new();
  for line in collapsed.split('\n') {
    out.push_str(display_name);
    out.push_str(&padding);
    out.push_str(": ");
    out.push_str(line);
    out.push('\n');
  }
  Some(out)
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn print_lines_strips_trailing_newline_and_prefixes() {
    let out = format_print_lines("hi\n", "web", 3).unwrap();
    assert_eq!(out, "web: hi\n");
  }

  #[test]
  fn print_lines_pads_to_max_width() {
    let out = format_print_lines("hi\n", "web", 6).unwrap();
    assert_eq!(out, "web   : hi\n");
  }

  #[test]
  fn print_lines_collapses_blank_runs_to_fixpoint() {
    let out = format_print_lines("a\n\n\n\nb\n", "w", 1).unwrap();
    assert_eq!(out, "w: a\nw: b\n");
  }

  #[test]
  fn print_lines_emits_nothing_for_empty_text() {
    assert!(format_print_lines("\n", "w", 1).is_none());
    assert!(format_print_lines("", "w", 1).is_none());
  }

  #[test]
  fn send_ctrl_maps_letters_to_control_bytes() {
    let mut d = test_support::fake_dispatcher(1, "host");
    d.send_ctrl('c').unwrap();
    assert_eq!(d.channel.write_buffer, vec![0x03]);
    d.channel.write_buffer.clear();
    d.send_ctrl('d').unwrap();
    assert_eq!(d.channel.write_buffer, vec![0x04]);
    d.channel.write_buffer.clear();
    d.send_ctrl('z').unwrap();
    assert_eq!(d.channel.write_buffer, vec![0x1A]);
  }

  #[test]
  fn disabled_dispatcher_rejects_writes() {
    let mut d = test_support::fake_dispatcher(2, "host");
    d.set_enabled(false);
    assert!(!d.dispatch_write(b"hi").unwrap());
  }
}
