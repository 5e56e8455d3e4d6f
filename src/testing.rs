//! TAP (Test Anything Protocol) harness for on-device link tests.
//!
//! Unit tests run on the host with `cargo test`. Anything that must run on
//! the radio board itself (buffer bounds under the real allocator, timing of
//! the receive path) is written as a `#[tap_test]` and collected by the
//! `device-tests` binary, which prints TAP over the serial console.
//!
//! **Note:** This module is only available with the `tap-tests` feature so
//! test code never ends up in a production image.
//!
//! # Usage
//!
//! ```ignore
//! // In src/link/mymodule.rs
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use winot_macros::tap_test;
//!
//!     #[tap_test]
//!     fn fragment_count_matches() {
//!         assert_eq!(fragment_count(1600), 7);
//!     }
//!
//!     #[tap_test]
//!     fn config_parses() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         let config = LinkConfig::from_json("{}")?;
//!         assert_eq!(config.channel, 35);
//!         Ok(())
//!     }
//!
//!     #[tap_test(skip = "needs a second board")]
//!     fn over_the_air() {}
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};

// Used by code generated from #[tap_test]
pub use inventory;

/// Result type for test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registration hook generated for each test.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A test collected through `inventory`.
pub struct TapTestEntry {
    /// Test name.
    pub name: &'static str,
    /// Runs the test on a runner.
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    /// Create an entry.
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Number of registered tests.
pub fn test_count() -> usize {
    inventory::iter::<TapTestEntry>.into_iter().count()
}

/// Run every registered test. Returns true if none failed.
pub fn run_all_tests() -> bool {
    let mut runner = TestRunner::new();
    runner.print_header(test_count());

    for entry in inventory::iter::<TapTestEntry> {
        (entry.register)(&mut runner);
    }

    runner.finish()
}

/// Extract a readable message from a panic payload.
fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs tests and prints TAP lines.
#[derive(Debug, Default)]
pub struct TestRunner {
    tests_run: usize,
    tests_passed: usize,
    tests_failed: usize,
    tests_skipped: usize,
}

impl TestRunner {
    /// Create an empty runner.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_number(&mut self) -> usize {
        self.tests_run += 1;
        self.tests_run
    }

    fn pass(&mut self, num: usize, name: &str) {
        self.tests_passed += 1;
        println!("ok {} - {}", num, name);
    }

    fn fail(&mut self, num: usize, name: &str, diagnostic: &str) {
        self.tests_failed += 1;
        println!("not ok {} - {}", num, name);
        println!("# {}", diagnostic);
    }

    /// Run a test returning a result. Panics count as failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let num = self.next_number();
        match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => self.pass(num, name),
            Ok(Err(e)) => self.fail(num, name, &format!("Error: {}", e)),
            Err(panic) => self.fail(
                num,
                name,
                &format!("Panic: {}", extract_panic_message(&panic)),
            ),
        }
    }

    /// Run a test that reports failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let num = self.next_number();
        let panic = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => {
                self.fail(num, name, "Expected panic but test completed normally");
                return;
            }
            Err(panic) => panic,
        };

        let msg = extract_panic_message(&panic);
        match expected {
            Some(expected) if !msg.contains(expected) => self.fail(
                num,
                name,
                &format!("Expected panic containing '{}', got '{}'", expected, msg),
            ),
            _ => self.pass(num, name),
        }
    }

    /// Report a test as skipped without running it.
    pub fn skip(&mut self, name: &str, reason: &str) {
        let num = self.next_number();
        self.tests_skipped += 1;
        println!("ok {} - {} # SKIP {}", num, name, reason);
    }

    /// Print the TAP header.
    pub fn print_header(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if no test failed.
    pub fn finish(&self) -> bool {
        println!("# -----------------------");
        println!("# Tests run: {}", self.tests_run);
        println!("# Passed: {}", self.tests_passed);
        println!("# Failed: {}", self.tests_failed);
        println!("# Skipped: {}", self.tests_skipped);

        let ok = self.tests_failed == 0;
        println!("# Result: {}", if ok { "PASS" } else { "FAIL" });
        ok
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }

    pub fn tests_skipped(&self) -> usize {
        self.tests_skipped
    }
}

// The harness checks itself with its own tests.
mod tap_tests {
    use super::*;
    use winot_macros::tap_test;

    #[tap_test]
    fn runner_counts_pass_and_fail() {
        let mut runner = TestRunner::new();
        runner.run("pass", || Ok(()));
        runner.run("fail", || Err("link down".into()));
        assert_eq!(runner.tests_run(), 2);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_catches_panic() {
        let mut runner = TestRunner::new();
        runner.run_assert("panics", || panic!("buffer overrun"));
        assert_eq!(runner.tests_failed(), 1);
    }

    #[tap_test]
    fn runner_checks_panic_message() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("matches", || panic!("fragment too short"), Some("too short"));
        runner.run_should_panic("mismatch", || panic!("overrun"), Some("too short"));
        runner.run_should_panic("no panic", || {}, None);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn runner_skip_is_not_failure() {
        let mut runner = TestRunner::new();
        runner.skip("later", "needs hardware");
        assert_eq!(runner.tests_run(), 1);
        assert_eq!(runner.tests_skipped(), 1);
        assert!(runner.finish());
    }
}
