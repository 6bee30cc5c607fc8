//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the client crates MUST NOT use sleep() for
//! waiting or polling. Wait on channels, `watch` receivers and timeouts instead.
//!
//! **Exceptions**:
//! - Reconnection backoff (retry context with a growing delay)
//! - `tokio::time::interval` for periodic tasks
//! - Test code

use architectural_enforcement::{
    code_part, is_in_test_function, report, rust_sources, PRODUCTION_DIRS,
};

/// Test that production code does not use sleep()
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    report(
        "CRITICAL: sleep() calls found in production code!",
        &violations,
        &[
            "✅ ACCEPTABLE alternatives:",
            "  - watch::Receiver::changed() / wait_for() for state changes",
            "  - tokio::time::timeout() around the awaited operation",
            "  - tokio::time::interval() for periodic probes",
            "  - oneshot channels for shutdown handshakes",
        ],
    );
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for file in rust_sources(dir) {
            let lines = file.lines();
            for (idx, line) in lines.iter().enumerate() {
                let code = code_part(line);
                if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                    continue;
                }
                if is_in_test_function(&lines, idx)
                    || is_backoff_context(&lines, idx)
                    || is_interval_pattern(&lines, idx)
                {
                    continue;
                }
                violations.push(file.violation(idx, "sleep() call", line));
            }
        }
    }

    violations
}

/// Check if this sleep is part of a reconnect backoff
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(10)..current_idx;

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for i in context_range {
        let line = lines[i].to_lowercase();

        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }

        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if this is tokio::time::interval pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(20)..current_idx;

    for i in context_range {
        let line = lines[i];
        if line.contains("interval.tick()") || line.contains("tokio::time::interval") {
            return true;
        }
    }

    false
}

#[test]
fn test_backoff_detection() {
    let code = vec![
        "async fn reconnect() {",
        "    let delay = base_delay * (1 << attempt);",
        "    tracing::warn!(attempt, \"Retrying\");",
        "    tokio::time::sleep(Duration::from_millis(delay)).await;",
        "}",
    ];

    assert!(
        is_backoff_context(&code, 3),
        "Should detect exponential backoff pattern"
    );
}

#[test]
fn test_plain_polling_sleep_is_not_excused() {
    let code = vec![
        "pub async fn wait_until_reachable(&self) -> BackendStatus {",
        "    loop {",
        "        if self.check().await.is_connected() { break; }",
        "        tokio::time::sleep(self.poll_interval).await;",
        "    }",
        "}",
    ];

    assert!(!is_in_test_function(&code, 3));
    assert!(!is_backoff_context(&code, 3));
    assert!(!is_interval_pattern(&code, 3));
}
