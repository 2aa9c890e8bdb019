use assert_cmd::Command;
use predicates::prelude::*;

fn nsfork() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nsfork"))
}

#[test]
fn test_help_command() {
    nsfork()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("namespaces"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("stat"))
        .stdout(predicate::str::contains("ls"))
        .stdout(predicate::str::contains("rm"))
        .stdout(predicate::str::contains("devices"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
fn test_version_command() {
    nsfork()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nsfork"));
}

#[test]
fn test_target_required() {
    nsfork()
        .args(["stat", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_ns_and_pid_conflict() {
    nsfork()
        .args(["--ns", "/proc/self/ns", "--pid", "1", "stat", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_missing_handle() {
    let dir = tempfile::tempdir().unwrap();
    nsfork()
        .arg("--ns")
        .arg(dir.path())
        .args(["stat", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_missing_pid_uses_proc_root() {
    let dir = tempfile::tempdir().unwrap();
    nsfork()
        .arg("--proc-root")
        .arg(dir.path())
        .args(["--pid", "4242", "devices"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("4242/ns/net"));
}

#[test]
fn test_switch_failure_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mnt"), b"").unwrap();
    std::fs::write(dir.path().join("net"), b"").unwrap();

    nsfork()
        .arg("--ns")
        .arg(dir.path())
        .args(["--timeout", "5", "ls", "/"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to setns net namespace"));
}
