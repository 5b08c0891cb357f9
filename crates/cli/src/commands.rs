//! Dispatch a parsed `ControlCommand` onto the engine.
//!
//! Grounded on `original_source/gsh/control_commands.py`'s `do_*` family —
//! one arm per control command, each a thin wrapper over `EngineContext`.

use anyhow::{Result, anyhow};

use groupshell_core::engine::EngineContext;

use crate::args::{ControlCommand, DebugToggle};
use crate::select::selected_shells;

/// What the interactive loop should do after running one control command.
pub enum Outcome {
  /// Keep going; operator-facing text to print, if any.
  Continue(Option<String>),
  /// `:quit` was issued — unwind the event loop.
  Quit,
  /// `:hide-password` was issued — the caller should suppress local
  /// terminal echo for exactly the next line it reads.
  SuppressNextEcho,
}

pub fn execute(ctx: &mut EngineContext, command: ControlCommand) -> Result<Outcome> {
  match command {
    ControlCommand::List { patterns } => {
      let ids = selected_shells(ctx, &patterns);
      Ok(Outcome::Continue(Some(ctx.format_selected(&ids))))
    }
    ControlCommand::Quit => {
      ctx.quit_all();
      Ok(Outcome::Quit)
    }
    ControlCommand::Chdir { path } => {
      if let Err(err) = ctx.chdir(&path) {
        return Ok(Outcome::Continue(Some(err.to_string())));
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::SendCtrl { letter, patterns } => {
      let letter = letter
        .chars()
        .next()
        .ok_or_else(|| anyhow!("expected a single letter (c, d, or z)"))?;
      for id in selected_shells(ctx, &patterns) {
        ctx.send_ctrl(id, letter)?;
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::ResetPrompt { patterns } => {
      for id in selected_shells(ctx, &patterns) {
        ctx.reset_prompt(id)?;
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Enable { patterns } => {
      for id in selected_shells(ctx, &patterns) {
        ctx.enable(id);
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Disable { patterns } => {
      for id in selected_shells(ctx, &patterns) {
        ctx.disable(id);
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Reconnect { patterns } => {
      for id in selected_shells(ctx, &patterns) {
        ctx.reconnect(id)?;
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Add { hosts } => {
      for host in hosts {
        ctx.add(&host, None)?;
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Purge { patterns } => {
      let ids = selected_shells(ctx, &patterns);
      ctx.purge(&ids);
      Ok(Outcome::Continue(None))
    }
    ControlCommand::Rename { new_name } => {
      let name = new_name.unwrap_or_default();
      for id in ctx.ids() {
        if ctx.is_enabled(id) {
          ctx.rename(id, &name)?;
        }
      }
      Ok(Outcome::Continue(None))
    }
    ControlCommand::HidePassword => {
      ctx.hide_password();
      Ok(Outcome::SuppressNextEcho)
    }
    ControlCommand::SetDebug { value, patterns } => {
      let flag = matches!(value, DebugToggle::Y);
      let ids = selected_shells(ctx, &patterns);
      ctx.set_debug(&ids, flag);
      Ok(Outcome::Continue(None))
    }
    ControlCommand::ExportRank => {
      ctx.export_rank()?;
      Ok(Outcome::Continue(None))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use groupshell_core::config::Config;

  fn test_ctx() -> EngineContext {
    let mut cfg = Config::default();
    cfg.transport_template = "true".to_string();
    EngineContext::new(cfg)
  }

  #[test]
  fn add_then_list_reports_the_new_shell() {
    let mut ctx = test_ctx();
    execute(&mut ctx, ControlCommand::Add { hosts: vec!["a".to_string()] }).unwrap();
    let Outcome::Continue(Some(text)) =
      execute(&mut ctx, ControlCommand::List { patterns: vec![] }).unwrap()
    else {
      panic!("expected list output");
    };
    assert!(text.contains('a'));
  }

  #[test]
  fn disable_then_purge_drops_the_shell() {
    let mut ctx = test_ctx();
    execute(&mut ctx, ControlCommand::Add { hosts: vec!["a".to_string()] }).unwrap();
    execute(&mut ctx, ControlCommand::Disable { patterns: vec![] }).unwrap();
    execute(&mut ctx, ControlCommand::Purge { patterns: vec![] }).unwrap();
    assert!(ctx.ids().is_empty());
  }

  #[test]
  fn quit_reports_outcome_quit() {
    let mut ctx = test_ctx();
    let outcome = execute(&mut ctx, ControlCommand::Quit).unwrap();
    assert!(matches!(outcome, Outcome::Quit));
  }
}
