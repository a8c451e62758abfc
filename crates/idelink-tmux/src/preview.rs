//! Diff previews as throwaway tmux windows running `diff -u | less`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use idelink_core::plan::posix_quote;
use idelink_core::{HostError, PreviewPresenter, ProposedEdit};

use crate::error::TmuxError;
use crate::executor::TmuxCommandRunner;

const PROPOSED_PREFIX: &str = "idelink-proposed-";

/// A preview window and the temporary file holding the proposed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxPreview {
    pub window: String,
    pub proposed: PathBuf,
}

pub struct TmuxPreviewPresenter<R> {
    runner: Arc<R>,
    session: String,
    pager: String,
    scratch_dir: Option<PathBuf>,
}

impl<R: TmuxCommandRunner> TmuxPreviewPresenter<R> {
    pub fn new(runner: Arc<R>, session: impl Into<String>) -> Self {
        Self {
            runner,
            session: session.into(),
            pager: "less -R".to_string(),
            scratch_dir: None,
        }
    }

    #[must_use]
    pub fn with_pager(mut self, pager: impl Into<String>) -> Self {
        self.pager = pager.into();
        self
    }

    /// Directory for proposed-content files (default: the system temp dir).
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn write_proposed(&self, edit: &ProposedEdit) -> Result<PathBuf, HostError> {
        let suffix = edit
            .target
            .path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut builder = tempfile::Builder::new();
        builder.prefix(PROPOSED_PREFIX).suffix(&suffix);
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        std::fs::write(file.path(), &edit.proposed_content)?;
        let (_, path) = file.keep().map_err(|e| HostError::Io(e.error))?;
        Ok(path)
    }

    fn session_exists(&self) -> Result<bool, TmuxError> {
        let target = format!("={}", self.session);
        match self.runner.run(&["has-session", "-t", &target]) {
            Ok(_) => Ok(true),
            Err(TmuxError::CommandFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn diff_command(&self, edit: &ProposedEdit, proposed: &Path) -> String {
        let name = edit.target.name();
        format!(
            "diff -u --label {} --label {} -- {} {} | {}",
            posix_quote(&format!("current/{name}")),
            posix_quote(&format!("proposed/{name}")),
            posix_quote(&edit.target.path.to_string_lossy()),
            posix_quote(&proposed.to_string_lossy()),
            self.pager,
        )
    }
}

impl<R: TmuxCommandRunner> PreviewPresenter for TmuxPreviewPresenter<R> {
    type Handle = TmuxPreview;

    fn present(&self, workspace: &Path, edit: &ProposedEdit) -> Result<TmuxPreview, HostError> {
        let proposed = self.write_proposed(edit)?;
        let target = format!("={}:", self.session);
        let dir = workspace.to_string_lossy();
        let title = format!("diff:{}", edit.target.name());
        let command = self.diff_command(edit, &proposed);

        let out = match self.session_exists() {
            Ok(true) => self.runner.run(&[
                "new-window", "-P", "-F", "#{window_id}", "-t", &target, "-c", &dir, "-n", &title,
                &command,
            ]),
            Ok(false) => self.runner.run(&[
                "new-session", "-d", "-P", "-F", "#{window_id}", "-s", &self.session, "-c", &dir,
                "-n", &title, &command,
            ]),
            Err(e) => Err(e),
        };
        let window = match out {
            Ok(out) => out.trim().to_string(),
            Err(e) => {
                let _ = std::fs::remove_file(&proposed);
                return Err(e.into());
            }
        };
        tracing::debug!(window = %window, file = %edit.file_path, "diff preview opened");
        Ok(TmuxPreview { window, proposed })
    }

    fn dismiss(&self, _workspace: &Path, handle: TmuxPreview) -> Result<(), HostError> {
        let killed = self.runner.run(&["kill-window", "-t", &handle.window]);
        if let Err(e) = std::fs::remove_file(&handle.proposed) {
            tracing::debug!(path = %handle.proposed.display(), error = %e, "proposed file already gone");
        }
        killed?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::MockRunner;
    use idelink_core::FileRef;

    fn edit(dir: &Path) -> ProposedEdit {
        let target = dir.join("it's.rs");
        std::fs::write(&target, "old\n").expect("write");
        ProposedEdit {
            file_path: target.to_string_lossy().into_owned(),
            target: FileRef::new(target),
            proposed_content: "new\n".to_string(),
        }
    }

    #[test]
    fn present_opens_window_with_diff_of_proposed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(MockRunner::new(|_| Ok("@12\n".to_string())));
        let presenter =
            TmuxPreviewPresenter::new(runner.clone(), "idelink").with_scratch_dir(dir.path());

        let handle = presenter.present(dir.path(), &edit(dir.path())).expect("present");
        assert_eq!(handle.window, "@12");
        assert_eq!(std::fs::read_to_string(&handle.proposed).expect("read"), "new\n");
        assert_eq!(handle.proposed.extension().and_then(|e| e.to_str()), Some("rs"));

        let call = &runner.calls_to("new-window")[0];
        assert!(call.contains(&"=idelink:".to_string()));
        assert!(call.contains(&"diff:it's.rs".to_string()));
        let command = call.last().expect("command");
        assert!(command.starts_with("diff -u"));
        assert!(command.contains(r"it'\''s.rs"), "quoted target: {command}");
        assert!(command.ends_with("| less -R"));
    }

    #[test]
    fn present_starts_tmux_session_when_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(MockRunner::new(|args| match args[0] {
            "has-session" | "new-window" => {
                Err(TmuxError::CommandFailed("can't find session: idelink".into()))
            }
            _ => Ok("@4\n".to_string()),
        }));
        let presenter =
            TmuxPreviewPresenter::new(runner.clone(), "idelink").with_scratch_dir(dir.path());

        let handle = presenter.present(dir.path(), &edit(dir.path())).expect("present");
        assert_eq!(handle.window, "@4");
        assert!(runner.calls_to("new-window").is_empty());

        let call = &runner.calls_to("new-session")[0];
        assert_eq!(&call[..7], ["new-session", "-d", "-P", "-F", "#{window_id}", "-s", "idelink"]);
        assert!(call.contains(&"diff:it's.rs".to_string()));
        assert!(call.last().expect("command").starts_with("diff -u"));
    }

    #[test]
    fn failed_present_removes_proposed_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scratch = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(MockRunner::new(|_| {
            Err(TmuxError::CommandFailed("can't find session".into()))
        }));
        let presenter = TmuxPreviewPresenter::new(runner, "idelink").with_scratch_dir(scratch.path());

        assert!(presenter.present(dir.path(), &edit(dir.path())).is_err());
        assert_eq!(std::fs::read_dir(scratch.path()).expect("read dir").count(), 0);
    }

    #[test]
    fn dismiss_kills_window_and_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = Arc::new(MockRunner::new(|_| Ok("@3\n".to_string())));
        let presenter =
            TmuxPreviewPresenter::new(runner.clone(), "idelink").with_scratch_dir(dir.path());
        let handle = presenter.present(dir.path(), &edit(dir.path())).expect("present");
        let proposed = handle.proposed.clone();

        presenter.dismiss(dir.path(), handle).expect("dismiss");
        assert!(!proposed.exists());
        assert_eq!(
            runner.calls_to("kill-window")[0],
            ["kill-window", "-t", "@3"]
        );
    }

    #[test]
    fn dismiss_reports_kill_failure_after_cleanup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let proposed = dir.path().join("idelink-proposed-x");
        std::fs::write(&proposed, "x").expect("write");
        let runner = Arc::new(MockRunner::new(|_| {
            Err(TmuxError::CommandFailed("window not found".into()))
        }));
        let presenter = TmuxPreviewPresenter::new(runner, "idelink");

        let handle = TmuxPreview {
            window: "@9".to_string(),
            proposed: proposed.clone(),
        };
        assert!(presenter.dismiss(dir.path(), handle).is_err());
        assert!(!proposed.exists());
    }
}
