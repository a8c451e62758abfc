//! Control-protocol server: newline-delimited JSON-RPC 2.0.
//! Connection-per-request, served on a Unix socket and optionally on a
//! loopback TCP port.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Notify;

use idelink_core::{
    DiffRegistry, EditorHost, KeyEvent, PreviewPresenter, SessionHost, SessionManager, ShellFamily,
    WidgetId, with_port_env,
};

use crate::editor::WorkspaceEditor;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// The companion session could not be launched.
pub const LAUNCH_FAILED: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// How `launch` turns CLI arguments into the command sent to the session.
pub struct LaunchSettings {
    pub companion_command: String,
    pub shell: ShellFamily,
    pub port_env_var: String,
    /// Bound TCP port, once the listener is up.
    pub port: OnceLock<u16>,
}

impl LaunchSettings {
    pub fn command_line(&self, command: Option<&str>, args: &[String]) -> String {
        let mut line = command.unwrap_or(&self.companion_command).to_string();
        for arg in args {
            line.push(' ');
            line.push_str(&quote_arg(arg, self.shell));
        }
        with_port_env(
            &line,
            self.port.get().copied(),
            self.shell,
            &self.port_env_var,
        )
    }
}

fn quote_arg(arg: &str, shell: ShellFamily) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if plain {
        return arg.to_string();
    }
    match shell {
        ShellFamily::Posix => idelink_core::plan::posix_quote(arg),
        ShellFamily::PowerShell => format!("'{}'", arg.replace('\'', "''")),
        ShellFamily::Cmd => format!("\"{}\"", arg.replace('"', "\"\"")),
    }
}

/// Everything a request handler can reach.
pub struct Services<H: SessionHost + 'static, P: PreviewPresenter + 'static> {
    pub sessions: SessionManager<H>,
    pub diffs: DiffRegistry<WorkspaceEditor, P>,
    pub editor: Arc<WorkspaceEditor>,
    pub launch: LaunchSettings,
    pub shutdown: Arc<Notify>,
}

// ─── Params ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenDiffParams {
    file_path: String,
    new_content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileParams {
    file_path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaunchParams {
    #[serde(default)]
    base_dir: Option<PathBuf>,
    /// Replaces the configured companion command.
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Deserialize)]
struct TextParams {
    text: String,
}

#[derive(Deserialize)]
struct KeyEventParams {
    #[serde(flatten)]
    event: KeyEvent,
    #[serde(default)]
    focus: Option<WidgetId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferParams {
    file_path: String,
    text: String,
}

#[derive(Deserialize)]
struct WorkspaceParams {
    root: PathBuf,
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    T::deserialize(params).map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

// ─── Dispatch ────────────────────────────────────────────────────

/// Handle one request. Blocking: host calls may shell out to tmux.
pub fn dispatch<H, P>(services: &Services<H, P>, method: &str, params: &Value) -> Result<Value, RpcError>
where
    H: SessionHost + 'static,
    P: PreviewPresenter + 'static,
{
    match method {
        "open_diff" => {
            let p: OpenDiffParams = parse_params(params)?;
            to_value(&services.diffs.open(&p.file_path, &p.new_content))
        }
        "close_diff" => {
            let p: FileParams = parse_params(params)?;
            to_value(&services.diffs.close(&p.file_path))
        }
        "launch" => {
            let p: LaunchParams = parse_params(params)?;
            let base_dir = match p.base_dir {
                Some(dir) => dir,
                None => default_base_dir(&services.editor),
            };
            let command = services.launch.command_line(p.command.as_deref(), &p.args);
            services
                .sessions
                .launch(&base_dir, &command)
                .map_err(|e| RpcError::new(LAUNCH_FAILED, e.to_string()))?;
            Ok(json!({ "launched": true, "baseDir": base_dir }))
        }
        "type_text" => {
            let p: TextParams = parse_params(params)?;
            let delivered = services.sessions.type_into_active_session(&p.text);
            Ok(json!({ "delivered": delivered }))
        }
        "session_active" => Ok(Value::Bool(services.sessions.is_session_active())),
        "session_status" => {
            let status = services.sessions.status();
            Ok(json!({
                "session": status.session,
                "markers": status.markers,
                "runState": status.run_state,
                "displayed": status.displayed,
                "diffs": services.diffs.active_diffs(),
                "port": services.launch.port.get(),
            }))
        }
        "key_event" => {
            let p: KeyEventParams = parse_params(params)?;
            let consumed = services
                .sessions
                .key_dispatcher()
                .dispatch(&p.event, p.focus.as_ref());
            Ok(json!({ "consumed": consumed }))
        }
        "buffer_update" => {
            let p: BufferParams = parse_params(params)?;
            services.editor.update_buffer(p.file_path, p.text);
            Ok(json!({ "ok": true }))
        }
        "buffer_close" => {
            let p: FileParams = parse_params(params)?;
            let closed = services.editor.close_buffer(Path::new(&p.file_path));
            Ok(json!({ "closed": closed }))
        }
        "workspace_open" => {
            let p: WorkspaceParams = parse_params(params)?;
            services.editor.add_root(p.root);
            Ok(json!({ "ok": true }))
        }
        "workspace_close" => {
            let p: WorkspaceParams = parse_params(params)?;
            services.diffs.evict_workspace(&p.root);
            let closed = services.editor.remove_root(&p.root);
            Ok(json!({ "closed": closed }))
        }
        "shutdown" => {
            services.shutdown.notify_one();
            Ok(json!({ "stopping": true }))
        }
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    }
}

/// Launch directory when the caller names none: the first workspace root,
/// else the daemon's working directory.
fn default_base_dir(editor: &WorkspaceEditor) -> PathBuf {
    editor
        .workspace_roots()
        .into_iter()
        .next()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn response(id: Value, result: Result<Value, RpcError>) -> Value {
    match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": id }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "error": { "code": e.code, "message": e.message },
            "id": id,
        }),
    }
}

// ─── Transport ───────────────────────────────────────────────────

/// Bind the Unix socket: directory 0700, socket 0600, stale socket removed.
pub async fn bind_unix(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");
    Ok(listener)
}

pub async fn serve_unix<H, P>(listener: UnixListener, services: Arc<Services<H, P>>) -> anyhow::Result<()>
where
    H: SessionHost + 'static,
    P: PreviewPresenter + 'static,
{
    loop {
        let (stream, _) = listener.accept().await?;
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, services).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

pub async fn serve_tcp<H, P>(listener: TcpListener, services: Arc<Services<H, P>>) -> anyhow::Result<()>
where
    H: SessionHost + 'static,
    P: PreviewPresenter + 'static,
{
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::trace!(%peer, "tcp connection");
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, services).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection<S, H, P>(stream: S, services: Arc<Services<H, P>>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: SessionHost + 'static,
    P: PreviewPresenter + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let reply = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("").to_string();
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            let id = request["id"].clone();
            tracing::debug!(%method, "rpc request");
            let result = tokio::task::spawn_blocking(move || dispatch(&services, &method, &params))
                .await
                .unwrap_or_else(|e| Err(RpcError::new(INTERNAL_ERROR, e.to_string())));
            response(id, result)
        }
        Err(e) => response(
            Value::Null,
            Err(RpcError::new(PARSE_ERROR, format!("parse error: {e}"))),
        ),
    };

    let mut resp = serde_json::to_string(&reply)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}
