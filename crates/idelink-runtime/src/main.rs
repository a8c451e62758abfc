//! idelink: companion terminal session orchestrator.
//! One binary: the daemon that owns the tmux-hosted companion session and
//! diff previews, and the CLI that talks to it over the control protocol.

use clap::Parser;

mod cli;
mod client;
mod cmd_diff;
mod cmd_session;
mod config;
mod daemon;
mod editor;
mod server;
mod ui_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let config = config::Config::load(args.config.as_deref())?;
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let config = daemon::apply_overrides(config, opts);
            let filter = std::env::var("IDELINK_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok()
                .or_else(|| config.log_level.clone())
                .unwrap_or_else(|| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("idelink daemon starting");
            daemon::run_daemon(config, &socket_path).await?;
        }
        cli::Command::Launch(opts) => {
            cmd_session::cmd_launch(&socket_path, opts).await?;
        }
        cli::Command::Type(opts) => {
            cmd_session::cmd_type(&socket_path, &opts.text).await?;
        }
        cli::Command::Status(opts) => {
            cmd_session::cmd_status(&socket_path, opts.json).await?;
        }
        cli::Command::OpenDiff(opts) => {
            cmd_diff::cmd_open_diff(&socket_path, opts).await?;
        }
        cli::Command::CloseDiff(opts) => {
            cmd_diff::cmd_close_diff(&socket_path, opts).await?;
        }
        cli::Command::Key(opts) => {
            cmd_session::cmd_key(&socket_path, opts).await?;
        }
        cli::Command::Mention(opts) => {
            cmd_session::cmd_mention(&socket_path, &config, opts).await?;
        }
        cli::Command::Shutdown => {
            cmd_session::cmd_shutdown(&socket_path).await?;
        }
    }

    Ok(())
}
