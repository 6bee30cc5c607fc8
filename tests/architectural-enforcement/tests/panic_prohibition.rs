//! Integration Test: Panic Prohibition in Library Code
//!
//! **Policy**: `diagnostic-core` propagates errors. Production code MUST NOT
//! call `.unwrap()` or `.expect()`; failures surface as `Result`s or are
//! logged. Test modules are exempt.

use architectural_enforcement::{code_part, is_in_test_function, report, rust_sources};

#[test]
fn test_no_unwrap_in_core_library() {
    let mut violations = Vec::new();

    for file in rust_sources("client/core/src") {
        let lines = file.lines();
        for (idx, line) in lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains(".unwrap()") || code.contains(".expect(")) {
                continue;
            }
            if is_in_test_function(&lines, idx) {
                continue;
            }
            violations.push(file.violation(idx, "Panicking call", line));
        }
    }

    report(
        "CRITICAL: unwrap()/expect() found in library code!",
        &violations,
        &[
            "✅ REQUIRED:",
            "  - Propagate with `?` and a typed error",
            "  - Or log with tracing::warn! and continue",
        ],
    );
}
