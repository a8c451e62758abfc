//! `idelink open-diff` / `idelink close-diff`.

use serde_json::json;
use tokio::io::AsyncReadExt;

use idelink_core::ToolResult;

use crate::cli::{CloseDiffOpts, OpenDiffOpts};
use crate::client::rpc_call;
use crate::cmd_session::absolutize;

pub async fn cmd_open_diff(socket_path: &str, opts: OpenDiffOpts) -> anyhow::Result<()> {
    let path = absolutize(&opts.path)?;
    let content = match opts.content_file {
        Some(file) => tokio::fs::read_to_string(&file).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let params = json!({ "filePath": path.to_string_lossy(), "newContent": content });
    let result: ToolResult = serde_json::from_value(rpc_call(socket_path, "open_diff", params).await?)?;
    if result.is_error {
        anyhow::bail!("{}", result.first_text().unwrap_or("open_diff failed"));
    }
    Ok(())
}

pub async fn cmd_close_diff(socket_path: &str, opts: CloseDiffOpts) -> anyhow::Result<()> {
    let path = absolutize(&opts.path)?;
    let params = json!({ "filePath": path.to_string_lossy() });
    let result: ToolResult = serde_json::from_value(rpc_call(socket_path, "close_diff", params).await?)?;
    print!("{}", final_text(&result));
    Ok(())
}

fn final_text(result: &ToolResult) -> &str {
    result.first_text().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_text_of_close_payload() {
        let result: ToolResult = serde_json::from_value(
            json!({"isError": false, "content": [{"type": "text", "text": "WIP"}]}),
        )
        .expect("payload");
        assert_eq!(final_text(&result), "WIP");
        assert_eq!(final_text(&ToolResult::accepted()), "");
    }
}
