//! C5: the single-threaded, poll-based driver.
//!
//! Grounded on `crates/agency/src/pty/session.rs`'s select/poll loop shape,
//! generalized from one fd to the whole live dispatcher set. No thread is
//! ever spawned here; everything happens inline in `step`.

use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags, PollTimeout};

use crate::error::{EngineError, Result};

use super::EngineContext;
use super::callbacks::DispatcherId;

/// One pass of the event loop: poll every live dispatcher's fd, service
/// whichever are ready, and opportunistically reap any exited transport
/// children. `timeout` bounds how long this call may block when nothing is
/// ready; pass `Duration::ZERO` for a non-blocking poll.
pub struct EventLoop {
  last_activity: Instant,
}

impl EventLoop {
  pub fn new() -> Self {
    Self {
      last_activity: Instant::now(),
    }
  }

  /// Returns the number of `handle_read` invocations performed this step.
  pub fn step(&mut self, ctx: &mut EngineContext, timeout: Duration) -> Result<usize> {
    let (handle_reads, _) = self.step_with_extra(ctx, None, timeout)?;
    Ok(handle_reads)
  }

  /// Like `step`, but also polls `extra_fd` (the controlling terminal's
  /// stdin) in the very same `poll()` call, so a blocked read on the
  /// operator's line never starves remote output. Returns
  /// `(handle_reads, extra_fd_readable)`.
  pub fn step_with_extra(
    &mut self,
    ctx: &mut EngineContext,
    extra_fd: Option<RawFd>,
    timeout: Duration,
  ) -> Result<(usize, bool)> {
    let ids: Vec<(DispatcherId, RawFd, bool, bool)> = ctx
      .registry
      .all_instances()
      .filter(|d| d.active())
      .map(|d| (d.id(), d.channel_fd(), d.readable(), d.writable()))
      .collect();

    if ids.is_empty() && extra_fd.is_none() {
      std::thread::sleep(timeout.min(Duration::from_millis(50)));
      return Ok((0, false));
    }

    let mut poll_fds: Vec<PollFd> = Vec::with_capacity(ids.len() + 1);
    for (_, fd, readable, writable) in &ids {
      let mut flags = PollFlags::empty();
      if *readable {
        flags |= PollFlags::POLLIN;
      }
      if *writable {
        flags |= PollFlags::POLLOUT;
      }
      let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(*fd) };
      poll_fds.push(PollFd::new(borrowed, flags));
    }
    if let Some(fd) = extra_fd {
      let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
      poll_fds.push(PollFd::new(borrowed, PollFlags::POLLIN));
    }

    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);
    let n = nix::poll::poll(&mut poll_fds, timeout).map_err(|errno| EngineError::Io {
      display_name: "event_loop".to_string(),
      source: std::io::Error::from(errno),
    })?;
    if n == 0 {
      self.flush_stale(ctx);
      return Ok((0, false));
    }

    let mut handle_reads = 0usize;
    for (poll_fd, (id, _, _, _)) in poll_fds.iter().zip(ids.iter()) {
      let revents = poll_fd.revents().unwrap_or_else(PollFlags::empty);
      if revents.contains(PollFlags::POLLOUT) {
        if let Some(d) = ctx.registry.get_mut(*id) {
          let _ = d.on_writable();
        }
      }
      if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
        let outcome = if let Some(d) = ctx.registry.get_mut(*id) {
          Some(d.on_readable(&mut ctx.callbacks))
        } else {
          None
        };
        if let Some(outcome) = outcome {
          handle_reads += 1;
          ctx.note_handle_read();
          match outcome {
            Ok(event) => ctx.apply_event(*id, event),
            Err(_) => ctx.apply_event(*id, super::DispatcherEvent::Disconnected { was_starting: false }),
          }
        }
      }
    }
    let extra_readable = extra_fd.is_some()
      && poll_fds
        .last()
        .and_then(|pf| pf.revents())
        .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));

    self.reap_exited(ctx, &ids);
    ctx.registry.remove_dead();
    self.last_activity = Instant::now();
    Ok((handle_reads, extra_readable))
  }

  /// Opportunistically reap any transport child that exited on its own
  /// this round, so it never accumulates as a zombie while the loop is
  /// otherwise busy waiting on I/O readiness.
  fn reap_exited(&mut self, ctx: &mut EngineContext, ids: &[(DispatcherId, RawFd, bool, bool)]) {
    for (id, _, _, _) in ids {
      let event = if let Some(d) = ctx.registry.get_mut(*id) {
        d.reap_if_exited(&mut ctx.callbacks)
      } else {
        None
      };
      if let Some(event) = event {
        ctx.apply_event(*id, event);
      }
    }
  }

  fn flush_stale(&mut self, ctx: &mut EngineContext) {
    if self.last_activity.elapsed() < ctx.config.idle_flush {
      return;
    }
    let ids: Vec<DispatcherId> = ctx.registry.all_instances().map(|d| d.id()).collect();
    for id in ids {
      let event = if let Some(d) = ctx.registry.get_mut(id) {
        d.flush_stale_partial_line(&mut ctx.callbacks)
      } else {
        None
      };
      if let Some(event) = event {
        ctx.apply_event(id, event);
      }
    }
    self.last_activity = Instant::now();
  }
}

impl Default for EventLoop {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;

  #[test]
  fn step_with_no_dispatchers_is_a_quick_no_op() {
    let mut ctx = EngineContext::new(Config::default());
    let mut loop_ = EventLoop::new();
    let n = loop_.step(&mut ctx, Duration::from_millis(10)).unwrap();
    assert_eq!(n, 0);
  }

  #[test]
  fn step_reads_output_from_a_real_child() {
    let mut cfg = Config::default();
    cfg.transport_template = "printf 'hello\\n'".to_string();
    let mut ctx = EngineContext::new(cfg);
    ctx.add("world", None).unwrap();

    let mut loop_ = EventLoop::new();
    let mut total = 0;
    for _ in 0..20 {
      total += loop_.step(&mut ctx, Duration::from_millis(50)).unwrap();
      if total > 0 {
        break;
      }
    }
    assert!(total > 0, "expected at least one handle_read to fire");
  }
}
