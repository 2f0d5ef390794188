mod common;
use common::*;

const W3C_LOG: &str = concat!(
    "#Software: Microsoft Internet Information Services 8.5\n",
    "#Version: 1.0\n",
    "#Fields: date time c-ip cs-uri-stem cs-uri-query sc-status cs(User-Agent)\n",
    "2012-04-01 00:00:13 1.2.3.4 /index.html a=1 200 Mozilla/5.0\n",
    "2012-04-01 00:00:14 1.2.3.5 /contact - 200 Mozilla/5.0\n",
);

#[test]
fn test_w3c_extended_detection() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--stats-format", "json"],
        W3C_LOG,
    );
    assert_eq!(exit_code, 0);
    let summary = parse_summary(&stdout);
    assert_eq!(summary["recorded"], 2);
    assert_eq!(summary["invalid"], 0);
}

#[test]
fn test_w3c_fields_option_without_header() {
    let body = "2012-04-01 00:00:13 1.2.3.4 /index.html 200\n";
    let (stdout, stderr, exit_code) = run_loghit_with_file(
        &[
            "--dry-run",
            "--idsite",
            "1",
            "--log-format-name",
            "w3c_extended",
            "--w3c-fields",
            "#Fields: date time c-ip cs-uri-stem sc-status",
            "--stats-format",
            "json",
        ],
        body,
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);
    assert_eq!(parse_summary(&stdout)["recorded"], 1);
}

#[test]
fn test_forced_w3c_without_fields_fails() {
    let body = "2012-04-01 00:00:13 1.2.3.4 /index.html 200\n";
    let (_stdout, stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--log-format-name", "w3c_extended"],
        body,
    );
    assert_eq!(exit_code, 1);
    assert!(stderr.contains("--w3c-fields"), "stderr: {}", stderr);
}

#[test]
fn test_detection_failure_exits_with_error() {
    let (_stdout, stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1"],
        "not a log line\nstill not a log line\n",
    );
    assert_eq!(exit_code, 1);
    assert!(
        stderr.contains("cannot automatically determine the log format"),
        "stderr: {}",
        stderr
    );
    assert!(stderr.contains("--log-format-name"));
}

#[test]
fn test_empty_file_is_not_an_error() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--stats-format", "json"],
        "",
    );
    assert_eq!(exit_code, 0);
    assert_eq!(parse_summary(&stdout)["lines_read"], 0);
}

#[test]
fn test_unknown_format_name_lists_choices() {
    let (_stdout, stderr, exit_code) = run_loghit_with_file(
        &["--dry-run", "--idsite", "1", "--log-format-name", "apache"],
        ACCESS_LOG,
    );
    assert_eq!(exit_code, 1);
    assert!(stderr.contains("ncsa_extended"), "stderr: {}", stderr);
}

#[test]
fn test_custom_regex_format() {
    let body = "1.2.3.4 [10/Feb/2012:16:42:07] /page 200\n";
    let (stdout, stderr, exit_code) = run_loghit_with_file(
        &[
            "--dry-run",
            "--idsite",
            "1",
            "--log-format-regex",
            r"(?P<ip>\S+) \[(?P<date>[^\]]+)\] (?P<path>\S+) (?P<status>\d+)",
            "--stats-format",
            "json",
        ],
        body,
    );
    assert_eq!(exit_code, 0, "stderr: {}", stderr);
    assert_eq!(parse_summary(&stdout)["recorded"], 1);
}

#[test]
fn test_dump_log_regex() {
    let (stdout, _stderr, exit_code) = run_loghit_with_file(&["--dump-log-regex"], ACCESS_LOG);
    assert_eq!(exit_code, 0);
    assert!(stdout.contains("Using format 'ncsa_extended'."), "stdout: {}", stdout);
    assert!(stdout.contains("Regex being used: "));
    assert!(stdout.contains("--dump-log-regex option used, aborting log import."));
}

#[test]
fn test_dump_log_regex_json_format() {
    let body = r#"{"ip":"1.2.3.4","host":"example.com","path":"/","status":"200","date":"2012-02-10T16:42:07+01:00"}"#;
    let (stdout, _stderr, exit_code) =
        run_loghit_with_file(&["--dump-log-regex", "--log-format-name", "nginx_json"], body);
    assert_eq!(exit_code, 0);
    assert!(stdout.contains("does not use a regex"), "stdout: {}", stdout);
}
