// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for config loading, env overrides, and validation.
//!
//! Lives outside `src/` because `env_overrides_win` mutates process
//! environment variables with `unsafe`, and the crate denies unsafe code.

use std::io::Write;
use std::path::Path;

use marketsync_config::{ConfigError, ConfigWarning, MarketsyncConfig, PartialConfig};

#[test]
fn defaults_are_valid() {
    let warnings = marketsync_config::validate_config(&MarketsyncConfig::default()).unwrap();
    assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::MissingOptionalField { .. })));
}

#[test]
fn rejects_bad_log_level() {
    let mut c = MarketsyncConfig::default();
    c.log_level = "verbose".to_string();
    let err = marketsync_config::validate_config(&c).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }));
}

#[test]
fn rejects_zero_concurrency() {
    let mut c = MarketsyncConfig::default();
    c.concurrent_requests = 0;
    assert!(marketsync_config::validate_config(&c).is_err());
}

#[test]
fn high_concurrency_warns_not_errors() {
    let mut c = MarketsyncConfig::default();
    c.concurrent_requests = 100;
    let warnings = marketsync_config::validate_config(&c).unwrap();
    assert!(warnings.contains(&ConfigWarning::HighConcurrency { value: 100 }));
}

#[test]
fn env_overrides_win() {
    // SAFETY: this test owns CONCURRENT_REQUESTS for its duration; no other
    // test in this binary reads or writes it.
    unsafe { std::env::set_var("CONCURRENT_REQUESTS", "42") };
    let mut c = MarketsyncConfig::default();
    marketsync_config::apply_env_overrides(&mut c);
    assert_eq!(c.concurrent_requests, 42);
    unsafe { std::env::remove_var("CONCURRENT_REQUESTS") };
}

#[test]
fn load_from_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("marketsync.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "log_level = \"debug\"\nconcurrent_requests = 4").unwrap();
    let config = marketsync_config::load_config(Some(&path)).unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.concurrent_requests, 4);
}

#[test]
fn missing_file_errors() {
    let err = marketsync_config::load_config(Some(Path::new("/nonexistent/marketsync.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn merge_overlay_wins_on_set_fields() {
    let base = MarketsyncConfig::default();
    let overlay = PartialConfig { concurrent_requests: Some(16), ..Default::default() };
    let merged = marketsync_config::merge_configs(base.clone(), overlay);
    assert_eq!(merged.concurrent_requests, 16);
    assert_eq!(merged.log_level, base.log_level);
}
