//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions MUST NOT use `std::fs`, `std::net` sockets or
//! `std::process`. Synchronous helpers (config loading, token files, log
//! setup) may, since they run before or beside the runtime.

use architectural_enforcement::find_blocking_io_violations;

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async functions:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net and tokio::process instead.");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.",
            violations.len()
        );
    }
}
