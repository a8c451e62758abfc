//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use idelink_core::LineRange;

#[derive(Parser)]
#[command(name = "idelink", about = "companion terminal session and diff-preview bridge")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/idelink/idelink.sock)
    #[arg(long, short = 's', global = true, env = "IDELINK_SOCKET")]
    pub socket_path: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/idelink/config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (control-protocol server + UI loop + tmux poller)
    Daemon(DaemonOpts),
    /// Launch the companion command, or focus the session if it is running
    Launch(LaunchOpts),
    /// Type text into the companion session
    Type(TypeOpts),
    /// Show the companion session and open diff previews
    Status(StatusOpts),
    /// Propose new content for a file and show a diff preview
    OpenDiff(OpenDiffOpts),
    /// Close a diff preview and print the file's final content
    CloseDiff(CloseDiffOpts),
    /// Feed a key event through the key dispatcher
    Key(KeyOpts),
    /// Insert an @file mention into the companion session
    Mention(MentionOpts),
    /// Stop the daemon
    Shutdown,
}

#[derive(clap::Args, Default)]
pub struct DaemonOpts {
    /// tmux poll interval in milliseconds (overrides config)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// tmux socket path (overrides config)
    #[arg(long)]
    pub tmux_socket: Option<String>,

    /// Also listen on 127.0.0.1:<PORT>; 0 picks a free port
    #[arg(long)]
    pub tcp_port: Option<u16>,

    /// Workspace root (repeatable; overrides config)
    #[arg(long = "workspace", short = 'w')]
    pub workspaces: Vec<PathBuf>,
}

#[derive(clap::Args)]
pub struct LaunchOpts {
    /// Working directory of a newly created session
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Run this instead of the configured companion command
    #[arg(long)]
    pub command: Option<String>,

    /// Extra arguments for the companion command
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(clap::Args)]
pub struct TypeOpts {
    pub text: String,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// Print the raw JSON status
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct OpenDiffOpts {
    pub path: PathBuf,

    /// Read the proposed content from this file instead of stdin
    #[arg(long)]
    pub content_file: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct CloseDiffOpts {
    pub path: PathBuf,
}

#[derive(clap::Args)]
pub struct KeyOpts {
    /// Pane that owns keyboard focus
    #[arg(long)]
    pub pane: Option<String>,

    pub kind: KeyKindArg,

    /// "enter", a single character, or another key name
    pub key: String,

    #[arg(long)]
    pub shift: bool,
    #[arg(long)]
    pub ctrl: bool,
    #[arg(long)]
    pub alt: bool,
    #[arg(long)]
    pub meta: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KeyKindArg {
    Press,
    Typed,
    Release,
}

#[derive(clap::Args)]
pub struct MentionOpts {
    pub file: PathBuf,

    /// Line or line range, e.g. 12 or 12-20
    #[arg(long)]
    pub lines: Option<LineRange>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/idelink/idelink.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/idelink-{user}/idelink.sock")
}
