//! CLI integration tests

use std::process::Command;

fn cbench() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cbench"))
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = cbench()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("--container"), "Should show container flag");
    assert!(stdout.contains("--process"), "Should show process flag");
    assert!(
        stdout.contains("--benchmark-address"),
        "Should show benchmark flag"
    );
    assert!(stdout.contains("--destroy"), "Should show destroy flag");
    assert!(stdout.contains("--cores"), "Should show cores flag");
    assert!(stdout.contains("--duration"), "Should show duration flag");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = cbench()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("cbench"), "Should show binary name");
}

/// Test that the process flag is required
#[test]
fn test_process_required() {
    let output = cbench()
        .args(["-c", "docker"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Missing process should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--process"), "Should name the missing flag");
}

/// Test that unknown backends are rejected
#[test]
fn test_unknown_container_rejected() {
    let output = cbench()
        .args(["-c", "podman", "-p", "nginx"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Unknown backend should fail");
}

/// Test that a malformed benchmark address is rejected before anything runs
#[test]
fn test_bad_benchmark_address_rejected() {
    let output = cbench()
        .args(["-p", "nginx", "-b", "10.0.0.5:99999", "--dry-run"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Out-of-range port should fail");
}

/// Test that a dry-run cache benchmark runs both phases without touching the host
#[test]
fn test_dry_run_cache_benchmark() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = cbench()
        .args(["-p", "memcached", "-b", "10.0.0.5:11101", "--dry-run"])
        .arg("--output-dir")
        .arg(dir.path())
        .env("CBENCH_CONFIG", dir.path().join("none.toml"))
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Explicit missing config file should fail");

    let output = cbench()
        .args(["-p", "memcached", "-b", "10.0.0.5:11101", "--dry-run"])
        .arg("--output-dir")
        .arg(dir.path())
        .env("HOME", dir.path())
        .env("RUST_LOG", "info")
        .env_remove("CBENCH_CONFIG")
        .output()
        .expect("Failed to execute command");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Dry run should succeed: {}", stderr);
    assert!(stderr.contains("load_memcache 10.0.0.5:11101"));
    assert!(stderr.contains("mutated_memcache 10.0.0.5:11101"));
    // Dry runs do not create a session directory
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Test that a dry-run provision previews launch and forwarding without touching the host
#[test]
fn test_dry_run_provision_previews_forwarding() {
    let dir = tempfile::TempDir::new().unwrap();
    let nginx_config = dir.path().join("nginx.conf");
    let output = cbench()
        .args(["-c", "docker", "-p", "nginx", "--dry-run"])
        .env("HOME", dir.path())
        .env("RUST_LOG", "info")
        .env("CBENCH_NGINX_CONFIG_PATH", &nginx_config)
        .env_remove("CBENCH_CONFIG")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "Dry run should succeed: {}", stderr);
    assert!(stderr.contains("docker run --name nginx_container -P --cpus=1"));

    let inserts: Vec<&str> = stderr
        .lines()
        .filter(|line| line.contains("iptables -t") && line.contains(" -I "))
        .collect();
    assert_eq!(inserts.len(), 6, "Six forwarding rules expected: {}", stderr);
    assert!(stderr.contains("-I PREROUTING -p tcp -d 192.0.2.1 --dport 80 -j DNAT --to-destination 192.0.2.2:80"));

    assert!(stdout.contains("192.0.2.1:80"));
    assert!(!nginx_config.exists(), "Dry run must not write the nginx configuration");
}

/// Test that benchmarking and destroying cannot be combined
#[test]
fn test_benchmark_and_destroy_conflict() {
    let output = cbench()
        .args(["-p", "nginx", "-b", "10.0.0.5:32768", "-d", "--dry-run"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Conflicting modes should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"));
}
