//! Daemon: wires tmux → session manager / diff registry → control protocol.
//! Runs the UI loop thread, the control-protocol listeners and the tmux
//! termination poller until a shutdown signal or `shutdown` request.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::{Duration, MissedTickBehavior, interval};

use idelink_core::{DiffRegistry, EditorHost, KeyDispatcher, ScriptPlanner, SessionManager};
use idelink_tmux::{TmuxExecutor, TmuxHost, TmuxPreviewPresenter};

use crate::cli::DaemonOpts;
use crate::config::Config;
use crate::editor::WorkspaceEditor;
use crate::server::{self, LaunchSettings, Services};
use crate::ui_loop::UiLoop;

/// Fold daemon flags into the loaded config.
pub fn apply_overrides(mut config: Config, opts: DaemonOpts) -> Config {
    if let Some(ms) = opts.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(socket) = opts.tmux_socket {
        config.tmux.socket_path = Some(socket);
    }
    if opts.tcp_port.is_some() {
        config.tcp_port = opts.tcp_port;
    }
    if !opts.workspaces.is_empty() {
        config.workspaces = opts.workspaces;
    }
    config
}

fn build_executor(config: &Config) -> TmuxExecutor {
    let executor = TmuxExecutor::new(config.tmux.bin.clone());
    match &config.tmux.socket_path {
        Some(path) => executor.with_socket_path(path.clone()),
        None => executor,
    }
}

/// Run the daemon until ctrl-c, SIGTERM or a `shutdown` request.
pub async fn run_daemon(config: Config, socket_path: &str) -> anyhow::Result<()> {
    let runner = Arc::new(build_executor(&config));
    let session_name = config.tmux.session.clone();

    let host = Arc::new(
        TmuxHost::new(Arc::clone(&runner), session_name.clone())
            .with_capabilities(config.tmux.capabilities),
    );
    let presenter = Arc::new(TmuxPreviewPresenter::new(Arc::clone(&runner), session_name));
    let ui = Arc::new(UiLoop::spawn()?);

    let editor = Arc::new(WorkspaceEditor::new(effective_workspaces(&config)?));
    let planner = Arc::new(
        ScriptPlanner::new(config.shell).with_inline_limit(config.planner.inline_limit),
    );

    let sessions = SessionManager::new(
        Arc::clone(&host),
        planner.clone(),
        ui.clone(),
        KeyDispatcher::new(),
        config.session_config(),
    );
    let diffs = DiffRegistry::new(Arc::clone(&editor), presenter, ui.clone());
    let shutdown = Arc::new(Notify::new());

    let services = Arc::new(Services {
        sessions,
        diffs,
        editor: Arc::clone(&editor),
        launch: LaunchSettings {
            companion_command: config.companion_command.clone(),
            shell: config.shell,
            port_env_var: config.port_env_var.clone(),
            port: OnceLock::new(),
        },
        shutdown: Arc::clone(&shutdown),
    });

    // Start control-protocol listeners
    let uds = server::bind_unix(socket_path).await?;
    let uds_services = Arc::clone(&services);
    let uds_handle = tokio::spawn(async move {
        if let Err(e) = server::serve_unix(uds, uds_services).await {
            tracing::error!("UDS server error: {e}");
        }
    });

    let tcp_handle = match config.tcp_port {
        Some(port) => {
            let listener = TcpListener::bind(("127.0.0.1", port)).await?;
            let bound = listener.local_addr()?.port();
            let _ = services.launch.port.set(bound);
            tracing::info!("TCP server listening on 127.0.0.1:{bound}");
            let tcp_services = Arc::clone(&services);
            Some(tokio::spawn(async move {
                if let Err(e) = server::serve_tcp(listener, tcp_services).await {
                    tracing::error!("TCP server error: {e}");
                }
            }))
        }
        None => None,
    };

    // Start tmux poller
    let poll_host = Arc::clone(&host);
    let poll_ms = config.poll_interval_ms.max(50);
    let poll_handle = tokio::spawn(async move {
        run_poll_loop(poll_host, poll_ms).await;
    });

    // Wait for shutdown signal (ctrl-c, SIGTERM or RPC)
    let signals = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    tracing::warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                    tracing::info!("received ctrl-c, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
    };

    let tcp_wait = async {
        match tcp_handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = signals => {}
        () = shutdown.notified() => tracing::info!("shutdown requested, shutting down"),
        _ = poll_handle => tracing::warn!("poll loop exited unexpectedly"),
        _ = uds_handle => tracing::warn!("UDS server exited unexpectedly"),
        () = tcp_wait => tracing::warn!("TCP server exited unexpectedly"),
    }

    // Cleanup: previews, UI work, window-bound state, scripts, socket
    for root in editor.workspace_roots() {
        services.diffs.evict_workspace(&root);
    }
    ui.drain().await;
    host.close();
    let removed = planner.cleanup_all();
    if removed > 0 {
        tracing::debug!(removed, "removed launch scripts");
    }
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Poll tmux for finished commands and closed windows.
async fn run_poll_loop<R>(host: Arc<TmuxHost<R>>, poll_ms: u64)
where
    R: idelink_tmux::TmuxCommandRunner + 'static,
{
    let mut ticker = interval(Duration::from_millis(poll_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let host = Arc::clone(&host);
        match tokio::task::spawn_blocking(move || host.poll()).await {
            Ok(Ok(outcome)) if outcome.terminated > 0 || outcome.closed > 0 => {
                tracing::debug!(
                    terminated = outcome.terminated,
                    closed = outcome.closed,
                    "tmux poll"
                );
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!("tmux poll failed: {e}"),
            Err(e) => tracing::warn!("tmux poll task failed: {e}"),
        }
    }
}

/// Roots the daemon serves when none are configured.
pub fn effective_workspaces(config: &Config) -> anyhow::Result<Vec<PathBuf>> {
    if config.workspaces.is_empty() {
        Ok(vec![std::env::current_dir()?])
    } else {
        Ok(config.workspaces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let config = Config::default();
        let opts = DaemonOpts {
            poll_interval_ms: Some(100),
            tmux_socket: Some("/tmp/t.sock".to_string()),
            tcp_port: Some(0),
            workspaces: vec![PathBuf::from("/proj")],
        };
        let merged = apply_overrides(config, opts);
        assert_eq!(merged.poll_interval_ms, 100);
        assert_eq!(merged.tmux.socket_path.as_deref(), Some("/tmp/t.sock"));
        assert_eq!(merged.tcp_port, Some(0));
        assert_eq!(merged.workspaces, vec![PathBuf::from("/proj")]);
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = Config::default();
        config.tcp_port = Some(7000);
        config.workspaces = vec![PathBuf::from("/a")];
        let merged = apply_overrides(config.clone(), DaemonOpts::default());
        assert_eq!(merged, config);
    }

    #[test]
    fn executor_uses_configured_socket() {
        let mut config = Config::default();
        config.tmux.bin = "/opt/tmux".to_string();
        let exec = build_executor(&config);
        assert_eq!(exec.tmux_bin(), "/opt/tmux");
    }

    #[test]
    fn workspaces_default_to_cwd() {
        let roots = effective_workspaces(&Config::default()).expect("roots");
        assert_eq!(roots, vec![std::env::current_dir().expect("cwd")]);
    }
}
