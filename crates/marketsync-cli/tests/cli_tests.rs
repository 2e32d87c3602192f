// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integration tests for the `marketsync` CLI binary.

use assert_cmd::Command;
use predicates::str::contains;

fn marketsync() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("marketsync").expect("binary `marketsync` should be built")
}

#[test]
fn help_flag_prints_usage() {
    marketsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("marketsync"))
        .stdout(contains("run"))
        .stdout(contains("worker"));
}

#[test]
fn version_flag_prints_version() {
    marketsync().arg("--version").assert().success().stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn init_creates_data_and_image_directories() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let data_dir = tmp.path().join("data");
    let image_dir = tmp.path().join("images");

    marketsync()
        .env("DATA_DIR", data_dir.to_str().unwrap())
        .env("IMAGE_DIR", image_dir.to_str().unwrap())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("initialized"));

    assert!(data_dir.is_dir());
    assert!(image_dir.is_dir());
}

#[test]
fn status_prints_dashboard_json() {
    marketsync().arg("status").assert().success().stdout(contains("product_count")).stdout(contains("supplier_count"));
}

#[test]
fn run_without_source_url_is_a_usage_error() {
    marketsync().arg("run").assert().failure().code(2);
}

#[test]
fn worker_with_an_unknown_queue_name_is_a_usage_error() {
    marketsync().args(["worker", "--queues", "not-a-real-queue"]).assert().failure().code(2);
}
