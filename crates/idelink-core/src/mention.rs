//! File mentions typed into the companion session (`@src/lib.rs:10-20 `).

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// 1-based inclusive line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: Option<u32>,
}

impl LineRange {
    pub fn single(line: u32) -> Self {
        Self {
            start: line,
            end: None,
        }
    }

    pub fn span(start: u32, end: u32) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end != self.start => write!(f, "{}-{}", self.start, end),
            _ => write!(f, "{}", self.start),
        }
    }
}

impl FromStr for LineRange {
    type Err = String;

    /// `"12"` or `"12-20"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<u32, String> {
            match part.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("invalid line number: {part:?}")),
                Ok(n) => Ok(n),
            }
        };
        let range = match s.split_once('-') {
            Some((start, end)) => Self::span(parse(start)?, parse(end)?),
            None => Self::single(parse(s)?),
        };
        if range.end.is_some_and(|end| end < range.start) {
            return Err(format!("line range ends before it starts: {s}"));
        }
        Ok(range)
    }
}

/// Render the mention of `file` for the session: `@<path>[:<lines>] `.
///
/// The path is relative to `workspace_root` when the file lies under it and
/// stays absolute otherwise.
pub fn format_mention(workspace_root: &Path, file: &Path, lines: Option<LineRange>) -> String {
    let root = normalize(workspace_root);
    let file = normalize(file);
    let shown = match file.strip_prefix(&root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => file,
    };
    let shown = shown.to_string_lossy().replace('\\', "/");
    match lines {
        Some(range) => format!("@{shown}:{range} "),
        None => format!("@{shown} "),
    }
}

/// Lexical normalization: drops `.` and resolves `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_with_range() {
        let m = format_mention(
            Path::new("/proj"),
            Path::new("/proj/src/a.rs"),
            Some(LineRange::span(10, 20)),
        );
        assert_eq!(m, "@src/a.rs:10-20 ");
    }

    #[test]
    fn single_line_range_collapses() {
        let m = format_mention(
            Path::new("/proj"),
            Path::new("/proj/src/a.rs"),
            Some(LineRange::span(7, 7)),
        );
        assert_eq!(m, "@src/a.rs:7 ");
    }

    #[test]
    fn outside_root_stays_absolute() {
        let m = format_mention(Path::new("/proj"), Path::new("/other/b.rs"), None);
        assert_eq!(m, "@/other/b.rs ");
    }

    #[test]
    fn dot_segments_are_normalized() {
        let m = format_mention(Path::new("/proj/./"), Path::new("/proj/x/../src/a.rs"), None);
        assert_eq!(m, "@src/a.rs ");
    }

    #[test]
    fn parse_line_ranges() {
        assert_eq!("12".parse::<LineRange>(), Ok(LineRange::single(12)));
        assert_eq!("3-9".parse::<LineRange>(), Ok(LineRange::span(3, 9)));
        assert!("0".parse::<LineRange>().is_err());
        assert!("9-3".parse::<LineRange>().is_err());
        assert!("a-b".parse::<LineRange>().is_err());
    }
}
