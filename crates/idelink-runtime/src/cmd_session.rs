//! Session subcommands: launch, type, status, key, mention, shutdown.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use idelink_core::editor::owning_workspace;
use idelink_core::format_mention;

use crate::cli::{KeyKindArg, KeyOpts, LaunchOpts, MentionOpts};
use crate::client::rpc_call;
use crate::config::Config;

fn current_dir() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// Resolve `path` against the CLI's working directory.
pub(crate) fn absolutize(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(current_dir()?.join(path))
    }
}

pub async fn cmd_launch(socket_path: &str, opts: LaunchOpts) -> anyhow::Result<()> {
    let base_dir = match opts.dir {
        Some(dir) => absolutize(&dir)?,
        None => current_dir()?,
    };
    let params = json!({
        "baseDir": base_dir,
        "command": opts.command,
        "args": opts.args,
    });
    rpc_call(socket_path, "launch", params).await?;
    Ok(())
}

pub async fn cmd_type(socket_path: &str, text: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "type_text", json!({ "text": text })).await?;
    if result["delivered"].as_bool() != Some(true) {
        anyhow::bail!("no active companion session to type into");
    }
    Ok(())
}

pub async fn cmd_mention(socket_path: &str, config: &Config, opts: MentionOpts) -> anyhow::Result<()> {
    let file = absolutize(&opts.file)?;
    let cwd = current_dir()?;
    let root = owning_workspace(&config.workspaces, &file).unwrap_or(cwd);
    let text = format_mention(&root, &file, opts.lines);
    cmd_type(socket_path, &text).await
}

pub async fn cmd_key(socket_path: &str, opts: KeyOpts) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, "key_event", key_event_params(&opts)).await?;
    println!(
        "{}",
        if result["consumed"].as_bool() == Some(true) {
            "consumed"
        } else {
            "passed"
        }
    );
    Ok(())
}

pub(crate) fn key_event_params(opts: &KeyOpts) -> Value {
    let kind = match opts.kind {
        KeyKindArg::Press => "pressed",
        KeyKindArg::Typed => "typed",
        KeyKindArg::Release => "released",
    };
    let mut chars = opts.key.chars();
    let key = match (chars.next(), chars.next()) {
        _ if opts.key.eq_ignore_ascii_case("enter") => json!("enter"),
        (Some(c), None) => json!({ "char": c }),
        _ => json!({ "named": opts.key.to_ascii_lowercase() }),
    };
    json!({
        "kind": kind,
        "key": key,
        "modifiers": {
            "shift": opts.shift,
            "ctrl": opts.ctrl,
            "alt": opts.alt,
            "meta": opts.meta,
        },
        "focus": opts.pane,
    })
}

pub async fn cmd_status(socket_path: &str, raw_json: bool) -> anyhow::Result<()> {
    let status = rpc_call(socket_path, "session_status", json!({})).await?;
    if raw_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status, Utc::now()));
    }
    Ok(())
}

pub async fn cmd_shutdown(socket_path: &str) -> anyhow::Result<()> {
    rpc_call(socket_path, "shutdown", json!({})).await?;
    Ok(())
}

/// Human-readable status, one line per item.
pub(crate) fn format_status(status: &Value, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let session = &status["session"];
    if session.is_null() {
        out.push_str("session: none\n");
    } else {
        out.push_str(&format!(
            "session: {} ({}, pane {}) {}{}\n",
            session["label"].as_str().unwrap_or("?"),
            session["container"].as_str().unwrap_or("?"),
            session["widget"].as_str().unwrap_or("?"),
            status["runState"].as_str().unwrap_or("unknown"),
            if status["displayed"].as_bool() == Some(true) {
                " [displayed]"
            } else {
                ""
            },
        ));
    }
    if let Some(port) = status["port"].as_u64() {
        out.push_str(&format!("port: {port}\n"));
    }

    let diffs = status["diffs"].as_array().map(Vec::as_slice).unwrap_or_default();
    out.push_str(&format!("diffs: {}\n", diffs.len()));
    for diff in diffs {
        let age = diff["opened_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| format_age(now.signed_duration_since(t.with_timezone(&Utc))))
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(
            "  {} ({} bytes, {age} ago)\n",
            diff["file_path"].as_str().unwrap_or("?"),
            diff["proposed_bytes"].as_u64().unwrap_or(0),
        ));
    }
    out
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        _ => format!("{}h", secs / 3600),
    }
}
