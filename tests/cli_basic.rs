use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn vidfit() -> Command {
    Command::cargo_bin("vidfit").expect("binary built")
}

#[test]
fn requires_at_least_one_input() {
    vidfit()
        .assert()
        .failure()
        .stderr(predicate::str::contains("INPUT_FILES"));
}

#[test]
fn help_lists_sizing_knobs() {
    vidfit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--target-size"))
        .stdout(predicate::str::contains("--ceiling"))
        .stdout(predicate::str::contains("--max-retries"));
}

#[test]
fn missing_config_file_is_an_error() {
    vidfit()
        .args(["--config-file", "/definitely/not/here.toml", "input.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn rejects_ceiling_below_target() {
    vidfit()
        .args(["--target-size", "11", "--ceiling", "10", "input.mp4"])
        .env_remove("VIDFIT_CONFIG")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ceiling"));
}
