//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Displays wait on their
//! command channel and backend; periodic redraws use `tokio::time::interval`;
//! grace periods use `tokio::time::timeout`.

use architectural_enforcement::{find_sleep_violations, production_files};

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::time::interval for periodic work and");
        eprintln!("tokio::time::timeout for deadlines.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_scanner_sees_the_workspace() {
    let files = production_files();
    assert!(
        files.iter().any(|p| p.ends_with("core/src/display.rs")),
        "scanner found no production sources"
    );
}
