use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const IPR: &str =
    "AorZxvJw6MFfEOVSeocBIXOUetaIkjUIIJsSPDbxej4SIEUApnz9kE_QtIEAKHcz7g5dYreJQC9rZ3nOnoVhDSKA";

fn command() -> Command {
    let mut cmd = Command::new(cargo_bin!());
    for var in [
        "ILP_SECRET",
        "ILP_PREFIX",
        "ILP_BACKEND_URL",
        "ILP_CONNECTOR",
        "ILP_LISTENER_WINDOW_SECS",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_decode_ipr() -> Result<(), Box<dyn std::error::Error>> {
    command()
        .args(["decode-ipr", IPR])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "\"condition\": \"itnG8nDowV8Q5VJ6hwEhc5R61oiSNQggmxI8NvF6PhI\"",
        ))
        .stdout(predicate::str::contains(
            "\"packet\": \"RQCmfP2QT9C0gQAodzPuDl1it4lAL2tnec6ehWENIoA\"",
        ));

    Ok(())
}

#[test]
fn test_decode_invalid_ipr_fails() -> Result<(), Box<dyn std::error::Error>> {
    command()
        .args(["decode-ipr", "AAAA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported version"));

    Ok(())
}

#[test]
fn test_check_config() -> Result<(), Box<dyn std::error::Error>> {
    command()
        .env("ILP_PREFIX", "example.red.")
        .env("ILP_BACKEND_URL", "http://localhost:8080")
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("prefix=example.red."));

    command()
        .env("ILP_BACKEND_URL", "http://localhost:8080")
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ILP_PREFIX must be set"));

    Ok(())
}

#[test]
fn test_ilp_address() -> Result<(), Box<dyn std::error::Error>> {
    command()
        .args(["--ilp-prefix", "example.red.", "ilp-address", "alice"])
        .assert()
        .success()
        .stdout(predicate::str::diff("example.red.alice\n"));

    command()
        .args(["--ilp-prefix", "example.red.", "ilp-address", "al.ice"])
        .assert()
        .failure();

    Ok(())
}
