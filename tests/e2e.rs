use std::process::Command;

const HEADER: &str = "resource,capacity,confirmed,tentative,available";

fn run(requests: &str) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_admissions"))
        .arg("tests/fixtures/resources.csv")
        .arg(format!("tests/fixtures/{requests}"))
        .env("RUST_LOG", "warn")
        .env_remove("ADMISSIONS_HOLD_TTL_SECS")
        .env_remove("ADMISSIONS_STEP_TIMEOUT_MS")
        .output()
        .expect("failed to run binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn valid_requests() {
    let (stdout, stderr, success) = run("valid.csv");

    assert!(success);
    assert!(stderr.is_empty(), "{stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, [HEADER, "course-A,3,2,0,1", "course-B,1,1,0,0"]);
}

#[test]
fn errors_warn_but_do_not_block() {
    let (stdout, stderr, success) = run("with_errors.csv");

    assert!(success);
    assert!(stderr.contains("unrecognized request type 'transfer'"));
    assert!(stderr.contains("enroll missing amount"));
    assert!(stderr.contains("invalid fee 'abc'"));
    assert!(stderr.contains("payment failed: unsupported payment method 'cash'"));
    assert!(stderr.contains("verification failed: missing documents: id-proof"));
    assert!(stderr.contains("resource course-Z not found"));
    assert!(stderr.contains("resource course-B is full"));
    assert!(stderr.contains("nothing to withdraw"));

    // s1 withdrew, freeing the seat s10 took afterwards
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines, [HEADER, "course-A,3,3,0,0", "course-B,1,1,0,0"]);
}

#[test]
fn missing_arguments_is_a_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_admissions"))
        .arg("tests/fixtures/resources.csv")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run binary");

    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage"));
}
