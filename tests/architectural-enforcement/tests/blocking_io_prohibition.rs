//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the client crates MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::process`, not `std::fs`, `std::net`, `std::process`
//!
//! Blocking calls in plain functions are acceptable: configuration is loaded
//! before the session starts.

use architectural_enforcement::{
    code_part, is_in_async_function, is_in_test_function, report, rust_sources,
    PRODUCTION_DIRS,
};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    report(
        "CRITICAL: Blocking I/O calls found in async code!",
        &violations,
        &[
            "❌ FORBIDDEN in async code:",
            "  - std::fs::read(), std::fs::write(), std::fs::File",
            "  - std::net::TcpStream, std::net::TcpListener",
            "  - std::io::stdin()",
            "❌ FORBIDDEN everywhere:",
            "  - std::process::Command",
            "  - reqwest::blocking::*",
            "✅ REQUIRED async I/O:",
            "  - tokio::fs, tokio::net, tokio::io::stdin()",
            "  - tokio::process::Command::output().await",
        ],
    );
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in rust_sources(dir) {
            let lines = file.lines();
            for (idx, line) in lines.iter().enumerate() {
                let code = code_part(line);
                if code.trim().is_empty() || is_in_test_function(&lines, idx) {
                    continue;
                }
                if let Some(what) = blocking_call(code, is_in_async_function(&lines, idx)) {
                    violations.push(file.violation(idx, what, line));
                }
            }
        }
    }

    violations
}

/// Classify a blocking call on one line of code
fn blocking_call(code: &str, in_async: bool) -> Option<&'static str> {
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("std::process::Command") {
        return Some("Blocking process I/O");
    }
    if !in_async {
        return None;
    }
    if code.contains("std::fs::") {
        return Some("Blocking file I/O");
    }
    if code.contains("std::net::") {
        return Some("Blocking network I/O");
    }
    if code.contains("std::io::stdin()") {
        return Some("Blocking stdin in async");
    }
    None
}

#[test]
fn test_blocking_io_detection() {
    assert_eq!(
        blocking_call("    let c = std::fs::read_to_string(p)?;", true),
        Some("Blocking file I/O")
    );
    assert_eq!(blocking_call("    let c = std::fs::read_to_string(p)?;", false), None);
    assert_eq!(
        blocking_call("    let out = std::process::Command::new(\"sh\");", false),
        Some("Blocking process I/O")
    );
    assert_eq!(blocking_call("use std::process::Stdio;", false), None);
}
