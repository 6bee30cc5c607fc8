//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the client crates:
//! - No sleep() calls in production code
//! - Proper async I/O patterns
//! - No panicking shortcuts in library code
//!
//! The helpers here are shared by the scanners under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["client/core/src", "client/cli/src"];

/// Root of the workspace this package lives in
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// A scanned source file
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
}

impl SourceFile {
    pub fn lines(&self) -> Vec<&str> {
        self.content.lines().collect()
    }

    /// Format a violation at `idx` (0-based line index)
    pub fn violation(&self, idx: usize, what: &str, line: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            line.trim()
        )
    }
}

/// All `.rs` files under `dir` (relative to the workspace root)
#[must_use]
pub fn rust_sources(dir: &str) -> Vec<SourceFile> {
    let path = workspace_root().join(dir);
    if !path.exists() {
        return Vec::new();
    }

    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|e| {
            let content = fs::read_to_string(e.path()).ok()?;
            Some(SourceFile {
                path: e.path().to_path_buf(),
                content,
            })
        })
        .collect()
}

/// Code part of a line, with any trailing `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first test-only `#[cfg(...)]` line, if any
///
/// Everything after it is treated as test code.
#[must_use]
pub fn test_module_start(lines: &[&str]) -> Option<usize> {
    lines.iter().position(|line| {
        let line = line.trim_start();
        line.starts_with("#[cfg(test)]") || line.starts_with("#[cfg(all(test")
    })
}

/// Check if line is inside a test function or test module
#[must_use]
pub fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    if test_module_start(lines).is_some_and(|start| current_idx > start) {
        return true;
    }

    // Scan backwards to find the enclosing function
    let mut found_fn_idx = None;
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") || line.contains(" fn ") {
            found_fn_idx = Some(i);
            break;
        }

        // Stop at module boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }

    if let Some(fn_idx) = found_fn_idx {
        for i in (0..fn_idx).rev() {
            let line = lines[i].trim();

            if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
                return true;
            }

            if line.starts_with("fn ") || line.starts_with("mod ") || line.starts_with("impl ") {
                break;
            }
        }
    }

    false
}

/// Check if line is inside an async function
#[must_use]
pub fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("async fn ") || line.contains("async move") {
            return true;
        }

        if (line.starts_with("fn ") || line.contains(" fn ")) && !line.contains("async") {
            return false;
        }

        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Print violations and panic if there are any
pub fn report(title: &str, violations: &[String], advice: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    eprintln!();
    for line in advice {
        eprintln!("{line}");
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_contains_client() {
        assert!(workspace_root().join("client/core/Cargo.toml").exists());
    }

    #[test]
    fn test_test_module_detection() {
        let code = vec![
            "fn real() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() { x.unwrap(); }",
            "}",
        ];
        assert!(!is_in_test_function(&code, 0));
        assert!(is_in_test_function(&code, 3));
    }

    #[test]
    fn test_test_function_detection() {
        let code = vec![
            "#[tokio::test]",
            "async fn test_something() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(is_in_test_function(&code, 2));
    }

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "pub async fn load() {",
            "    let contents = std::fs::read_to_string(\"x\");",
            "}",
            "fn sync_load() {",
            "    let contents = std::fs::read_to_string(\"x\");",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }
}
