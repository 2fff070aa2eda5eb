//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in `tests/`:
//! - No sleep calls in production code (displays wait on I/O, ticks use
//!   `tokio::time::interval`)
//! - No blocking file or socket I/O inside async functions
//!
//! Everything after a `#[cfg(test)]` line is treated as test code and
//! skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Crate source trees that count as production code
pub const PRODUCTION_DIRS: &[&str] = &["core/src", "server/src", "tui/src"];

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// A line of production code
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Line with any trailing `//` comment removed
    pub code: String,
    /// Whether the enclosing function is `async`
    pub in_async_fn: bool,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Production lines of `path`, stopping at the first test module
#[must_use]
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    scan(path, &content)
}

/// Split `content` into production lines
#[must_use]
pub fn scan(path: &Path, content: &str) -> Vec<SourceLine> {
    let mut lines = Vec::new();
    let mut in_async_fn = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        if let Some(is_async) = fn_header(code) {
            in_async_fn = is_async;
        }
        lines.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code: code.to_string(),
            in_async_fn,
        });
    }
    lines
}

/// `Some(is_async)` when `code` starts a function
fn fn_header(code: &str) -> Option<bool> {
    let words: Vec<&str> = code.split_whitespace().collect();
    let fn_at = words.iter().position(|w| *w == "fn")?;
    let qualifiers = &words[..fn_at];
    let is_item = qualifiers
        .iter()
        .all(|w| matches!(*w, "pub" | "async" | "const" | "unsafe") || w.starts_with("pub("));
    is_item.then(|| qualifiers.contains(&"async"))
}

/// Sleep calls in production code
#[must_use]
pub fn find_sleep_violations() -> Vec<SourceLine> {
    production_files()
        .iter()
        .flat_map(|path| production_lines(path))
        .filter(|line| line.code.contains("::sleep(") || line.code.contains(".sleep("))
        .collect()
}

const BLOCKING_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::TcpStream",
    "std::net::TcpListener",
    "std::thread::sleep",
    "std::process::Command",
];

/// Blocking std I/O inside async functions
#[must_use]
pub fn find_blocking_io_violations() -> Vec<SourceLine> {
    production_files()
        .iter()
        .flat_map(|path| production_lines(path))
        .filter(|line| {
            line.in_async_fn && BLOCKING_PATTERNS.iter().any(|p| line.code.contains(p))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_stops_at_test_module() {
        let src = "fn a() {}\n#[cfg(test)]\nmod tests { fn b() { std::thread::sleep(d); } }\n";
        let lines = scan(Path::new("x.rs"), src);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_scan_tracks_async_functions() {
        let src = "pub async fn run() {\n    std::fs::read(p);\n}\nfn load() {\n    std::fs::read(p);\n}\n";
        let lines = scan(Path::new("x.rs"), src);
        assert!(lines[1].in_async_fn);
        assert!(!lines[4].in_async_fn);
    }

    #[test]
    fn test_comments_are_ignored() {
        let src = "// tokio::time::sleep(d)\nlet x = 1; // .sleep(\n";
        let lines = scan(Path::new("x.rs"), src);
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].code.contains("sleep"));
    }

    #[test]
    fn test_fn_header_ignores_calls() {
        assert_eq!(fn_header("    pub(crate) async fn go() {"), Some(true));
        assert_eq!(fn_header("fn go() {"), Some(false));
        assert_eq!(fn_header("let f = move |x| fn_like(x);"), None);
    }
}
