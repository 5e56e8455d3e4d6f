//! TAP test runner binary.
//!
//! Runs every test registered with `#[tap_test]` and prints TAP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin device-tests --features tap-tests
//! ```

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let success = winot::testing::run_all_tests();
    std::process::exit(if success { 0 } else { 1 });
}
