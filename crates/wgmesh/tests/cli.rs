//! Binary-level checks: exit status, stderr and stdout.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn wgmesh() -> Command {
    let mut cmd = wgmesh_with_default_logging();
    cmd.env("RUST_LOG", "off");
    cmd
}

fn wgmesh_with_default_logging() -> Command {
    let mut cmd = Command::cargo_bin("wgmesh").expect("binary built");
    cmd.env_clear();
    cmd
}

#[test]
fn invalid_subnet_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    wgmesh()
        .arg("--config-dir")
        .arg(dir.path())
        .args(["--server-url", "vpn.example.com", "--subnet-v4", "10.13.13.7/24"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("host bits are set"));
    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 0);
}

#[test]
fn missing_server_url_is_rejected() {
    wgmesh().assert().failure().stderr(predicate::str::contains("--server-url"));
}

#[test]
fn settings_errors_are_one_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    wgmesh()
        .arg("--config-dir")
        .arg(dir.path())
        .args(["--server-url", "vpn.example.com", "--port", "0"])
        .assert()
        .code(1)
        .stderr(predicate::eq("error: invalid settings: port: must not be 0\n"));
}

#[test]
fn existing_config_is_left_alone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server_file = dir.path().join("wg0.conf");
    fs::write(&server_file, "[Interface]\nListenPort = 51820\n").expect("write");

    wgmesh()
        .env("SERVERURL", "vpn.example.com")
        .env("CONFIG_DIR", dir.path())
        .env("PEERS", "2")
        .args(["--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"already_provisioned\""))
        .stdout(predicate::str::contains("\"requested\": 2"));

    assert_eq!(
        fs::read_to_string(&server_file).expect("read"),
        "[Interface]\nListenPort = 51820\n"
    );
    assert_eq!(fs::read_dir(dir.path()).expect("list").count(), 1);
}

#[test]
fn unknown_egress_interface_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    wgmesh()
        .arg("--config-dir")
        .arg(dir.path())
        .args(["--server-url", "vpn.example.com"])
        .args(["--egress-interfaces", "wgmesh-test-absent0"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("error: "))
        .stderr(predicate::str::contains("wgmesh-test-absent0"));
}

#[test]
fn fatal_error_is_reported_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = wgmesh_with_default_logging()
        .arg("--config-dir")
        .arg(dir.path())
        .args(["--server-url", "vpn.example.com"])
        .args(["--egress-interfaces", "wgmesh-test-absent0"])
        .assert()
        .code(1)
        .get_output()
        .clone();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(stderr.lines().count(), 1, "stderr: {stderr}");
    assert!(stderr.starts_with("error: no egress interface found"));
}

// Every Linux host has a loopback interface to stand in for the egress one.
#[cfg(target_os = "linux")]
#[test]
fn provisions_from_scratch() {
    let dir = tempfile::tempdir().expect("tempdir");
    wgmesh()
        .arg("--config-dir")
        .arg(dir.path())
        .args(["--server-url", "vpn.example.com", "--peers", "2"])
        .args(["--egress-interfaces", "lo", "--disable-ipv6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 2 peer(s)"));

    assert!(dir.path().join("wg0.conf").is_file());
    for name in ["peer_0", "peer_1"] {
        assert!(dir.path().join(name).join(format!("{name}.conf")).is_file());
        assert!(dir.path().join(name).join(format!("{name}.png")).is_file());
    }
}

#[cfg(target_os = "linux")]
#[test]
fn disable_ipv6_accepts_numeric_env_value() {
    let dir = tempfile::tempdir().expect("tempdir");
    wgmesh()
        .env("CONFIG_DIR", dir.path())
        .env("SERVERURL", "vpn.example.com")
        .env("EGRESS_INTERFACES", "lo")
        .env("DISABLE_IPV6", "1")
        .assert()
        .success();

    let server = fs::read_to_string(dir.path().join("wg0.conf")).expect("read");
    assert!(server.contains("Address = 10.13.13.1/24\n"));
    assert!(!server.contains("ip6tables"));
}
