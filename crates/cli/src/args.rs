//! Clap-derived argument shapes: the process-level invocation and the
//! `:`-prefixed control-command mini-language typed at the operator prompt.
//!
//! Grounded on the teacher's `args.rs` derive style; the control-command set
//! itself is transcribed from `original_source/gsh/control_commands.py`.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about = "Group shell multiplexer", long_about = None, bin_name = "groupshell")]
pub struct Cli {
  /// Remote hosts to connect to at startup.
  pub hosts: Vec<String>,
  /// Run this command on every host non-interactively, then exit once all
  /// of them have produced a prompt again.
  #[arg(short = 'c', long = "command")]
  pub command: Option<String>,
  /// Path to a project config file (default: `groupshell.toml` in cwd).
  #[arg(long)]
  pub config: Option<PathBuf>,
}

impl Cli {
  pub fn print_help_and_exit() {
    let mut cmd = Cli::command();
    cmd.print_help().expect("print help");
    println!();
  }
}

/// One typed control-command line, e.g. `:send-ctrl c web*`. Parsed with
/// `no_binary_name` since the first token is the subcommand, not a binary.
#[derive(Debug, Parser)]
#[command(name = "", no_binary_name = true, disable_help_flag = true)]
pub struct ControlLine {
  #[command(subcommand)]
  pub command: ControlCommand,
}

#[derive(Debug, Subcommand)]
pub enum ControlCommand {
  /// List every remote shell and its state.
  List { patterns: Vec<String> },
  /// Disconnect every remote shell and exit.
  Quit,
  /// Change this process's own working directory (not the remote shells').
  Chdir { path: PathBuf },
  /// Send a control character (c, d, or z) to matching shells.
  #[command(name = "send-ctrl")]
  SendCtrl { letter: String, patterns: Vec<String> },
  /// Re-send the init string so a confused shell re-syncs its prompt.
  #[command(name = "reset-prompt")]
  ResetPrompt { patterns: Vec<String> },
  /// Resume sending commands to matching shells.
  Enable { patterns: Vec<String> },
  /// Stop sending commands to matching shells without disconnecting them.
  Disable { patterns: Vec<String> },
  /// Respawn a dead shell under the same display name.
  Reconnect { patterns: Vec<String> },
  /// Connect to additional hosts.
  Add { hosts: Vec<String> },
  /// Delete disabled shells from the registry.
  Purge { patterns: Vec<String> },
  /// Rename every enabled shell; with no argument, restore the hostname.
  Rename { new_name: Option<String> },
  /// Suppress echoing the next typed line (useful before a password).
  #[command(name = "hide-password")]
  HidePassword,
  /// Toggle per-line debug tracing on matching shells.
  #[command(name = "set-debug")]
  SetDebug {
    value: DebugToggle,
    patterns: Vec<String>,
  },
  /// Broadcast `GSH_RANK`/`GSH_NR_SHELLS` to every enabled shell.
  #[command(name = "export-rank")]
  ExportRank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DebugToggle {
  Y,
  N,
}
