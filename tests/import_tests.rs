mod common;
use common::*;

use std::fs;
use std::io::Write;
use tempfile::TempDir;

#[test]
fn test_dry_run_summary_counts() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--stats-format", "json"],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 0, "loghit should exit successfully");

    let summary = parse_summary(&stdout);
    assert_eq!(summary["lines_read"], 6);
    assert_eq!(summary["parsed"], 5);
    assert_eq!(summary["recorded"], 2);
    assert_eq!(summary["downloads"], 1);
    assert_eq!(summary["invalid"], 1);
    assert_eq!(summary["static"], 1);
    assert_eq!(summary["skipped_user_agent"], 1);
    assert_eq!(summary["skipped_http_errors"], 1);
    assert_eq!(summary["total_ignored"], 4);
}

#[test]
fn test_text_summary() {
    let (stdout, _stderr, exit_code) =
        run_loghit_with_file(&["--dry-run", "--idsite", "1"], ACCESS_LOG);
    assert_eq!(exit_code, 0);
    assert!(stdout.contains("Logs import summary"));
    assert!(stdout.contains("2 requests imported successfully"));
    assert!(stdout.contains("1 requests were downloads"));
    assert!(stdout.contains("1 invalid log lines"));
}

#[test]
fn test_enable_flags_keep_everything_that_parsed() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &[
            "--dry-run",
            "--idsite",
            "1",
            "--enable-static",
            "--enable-bots",
            "--enable-http-errors",
            "--stats-format",
            "json",
        ],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 0);
    let summary = parse_summary(&stdout);
    assert_eq!(summary["recorded"], 5);
    assert_eq!(summary["total_ignored"], 1);
}

#[test]
fn test_stdin_input() {
    let (stdout, _stderr, exit_code) = run_loghit_with_input(
        &["--dry-run", "--idsite", "1", "--stats-format", "json", "-"],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 0);
    assert_eq!(parse_summary(&stdout)["recorded"], 2);
}

#[test]
fn test_skip_first_lines() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--skip", "3", "--stats-format", "json"],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 0);
    let summary = parse_summary(&stdout);
    assert_eq!(summary["lines_read"], 6);
    assert_eq!(summary["recorded"], 0);
    assert_eq!(summary["skipped_user_agent"], 1);
    assert_eq!(summary["skipped_http_errors"], 1);
}

#[test]
fn test_missing_file_is_skipped_with_warning() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("access.log");
    fs::write(&log, ACCESS_LOG).unwrap();
    let missing = temp_dir.path().join("nope.log");

    let (stdout, stderr, exit_code) = run_loghit_with_files(
        &["--dry-run", "--idsite", "1", "--stats-format", "json"],
        &[missing.to_str().unwrap(), log.to_str().unwrap()],
    );
    assert_eq!(exit_code, 0);
    assert!(stderr.contains("does not exist"), "stderr: {}", stderr);
    assert_eq!(parse_summary(&stdout)["recorded"], 2);
}

#[test]
fn test_gzip_input() {
    let mut file = tempfile::Builder::new().suffix(".gz").tempfile().unwrap();
    {
        let mut encoder =
            flate2::write::GzEncoder::new(file.as_file_mut(), flate2::Compression::default());
        encoder.write_all(ACCESS_LOG.as_bytes()).unwrap();
        encoder.finish().unwrap();
    }

    let (stdout, _stderr, exit_code) = run_loghit_with_files(
        &["--dry-run", "--idsite", "1", "--stats-format", "json"],
        &[file.path().to_str().unwrap()],
    );
    assert_eq!(exit_code, 0);
    assert_eq!(parse_summary(&stdout)["recorded"], 2);
}

#[test]
fn test_unmapped_hosts_are_listed() {
    let log = concat!(
        "www.example.com:80 1.2.3.4 - - [10/Feb/2012:16:42:07 +0100] \"GET /a HTTP/1.1\" 200 5 \"-\" \"Mozilla/5.0\"\n",
        "other.example.com:80 1.2.3.5 - - [10/Feb/2012:16:42:08 +0100] \"GET /b HTTP/1.1\" 200 5 \"-\" \"Mozilla/5.0\"\n",
    );
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--site", "www.example.com=3", "--stats-format", "json"],
        log,
    );
    assert_eq!(exit_code, 0);
    let summary = parse_summary(&stdout);
    assert_eq!(summary["recorded"], 1);
    assert_eq!(summary["no_site"], 1);
    assert_eq!(summary["sites"]["ignored_hostnames"][0], "other.example.com");
}

#[test]
fn test_records_through_tracker() {
    let tracker = FakeTracker::start(200, r#"{"status":"success","tracked":{tracked}}"#);
    let (stdout, stderr, exit_code) = run_loghit_with_file(
        &[
            "--url",
            &tracker.url,
            "--idsite",
            "1",
            "--token-auth",
            "secret",
            "--stats-format",
            "json",
        ],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);
    assert_eq!(parse_summary(&stdout)["recorded"], 2);

    let bodies = tracker.bodies();
    assert!(bodies.iter().all(|b| b["token_auth"] == "secret"));
    let requests = tracker.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.starts_with('?') && r.contains("idsite=1")));
    assert!(requests[0].contains("index.html"));
    assert!(requests[1].contains("download="));
}

#[test]
fn test_rejected_credentials_abort_with_resume_hint() {
    let tracker = FakeTracker::start(403, r#"{"status":"error","message":"forbidden"}"#);
    let (_stdout, stderr, exit_code) = run_loghit_with_file(
        &["--url", &tracker.url, "--idsite", "1", "--retry-max-attempts", "1"],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 1);
    assert!(stderr.contains("loghit: error:"), "stderr: {}", stderr);
    assert!(stderr.contains("--skip=0"), "stderr: {}", stderr);
}
