// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::NamedTempFile;

pub const BINARY: &str = env!("CARGO_BIN_EXE_loghit");

/// Combined log lines: one page, one image, one download, one bot, one 404, one garbage line
pub const ACCESS_LOG: &str = concat!(
    "1.2.3.4 - - [10/Feb/2012:16:42:07 +0100] \"GET /index.html HTTP/1.1\" 200 1024 \"-\" \"Mozilla/5.0\"\n",
    "1.2.3.4 - - [10/Feb/2012:16:42:08 +0100] \"GET /a.png HTTP/1.1\" 200 10 \"-\" \"Mozilla/5.0\"\n",
    "1.2.3.5 - - [10/Feb/2012:16:42:09 +0100] \"GET /report.pdf HTTP/1.1\" 200 99 \"-\" \"Mozilla/5.0\"\n",
    "1.2.3.6 - - [10/Feb/2012:16:42:10 +0100] \"GET / HTTP/1.1\" 200 5 \"-\" \"Googlebot/2.1\"\n",
    "1.2.3.7 - - [10/Feb/2012:16:42:11 +0100] \"GET /gone HTTP/1.1\" 404 0 \"-\" \"Mozilla/5.0\"\n",
    "this is not a log line\n",
);

fn collect(output: std::process::Output) -> (String, String, i32) {
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run loghit with given arguments and input via stdin
pub fn run_loghit_with_input(args: &[&str], input: &str) -> (String, String, i32) {
    let mut cmd = Command::new(BINARY)
        .env("NO_PROXY", "127.0.0.1,localhost")
        .args(["--ignore-config", "--no-progress"])
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start loghit");

    if let Some(stdin) = cmd.stdin.as_mut() {
        stdin
            .write_all(input.as_bytes())
            .expect("Failed to write to stdin");
    }

    collect(cmd.wait_with_output().expect("Failed to read output"))
}

/// Run loghit on a temporary file holding `file_content`
pub fn run_loghit_with_file(args: &[&str], file_content: &str) -> (String, String, i32) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(file_content.as_bytes())
        .expect("Failed to write to temp file");
    temp_file.flush().expect("Failed to flush temp file");

    let path = temp_file.path().to_str().unwrap().to_string();
    run_loghit_with_files(args, &[&path])
}

/// Run loghit with multiple files
pub fn run_loghit_with_files(args: &[&str], files: &[&str]) -> (String, String, i32) {
    let output = Command::new(BINARY)
        .env("NO_PROXY", "127.0.0.1,localhost")
        .args(["--ignore-config", "--no-progress"])
        .args(args)
        .args(files)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute loghit");
    collect(output)
}

/// Run loghit inside `dir` without `--ignore-config`, so config files are picked up
pub fn run_loghit_in_dir(dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(BINARY)
        .current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .arg("--no-progress")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("Failed to execute loghit");
    collect(output)
}

/// Parse the `--stats-format json` summary printed on stdout
pub fn parse_summary(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).expect("summary should be valid JSON")
}

/// Minimal bulk tracking endpoint on localhost.
///
/// Every request body is kept; each request is answered with `response`
/// (the `{tracked}` placeholder is replaced by the number of hits sent).
pub struct FakeTracker {
    pub url: String,
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl FakeTracker {
    pub fn start(status: u16, response: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind tracker");
        let url = format!("http://{}", listener.local_addr().unwrap());
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&bodies);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle_request(stream, status, response, &seen);
            }
        });
        Self { url, bodies }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().unwrap().clone()
    }

    /// Tracking request strings across every bulk request, in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.bodies()
            .iter()
            .flat_map(|body| {
                body["requests"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
            })
            .collect()
    }
}

fn handle_request(
    stream: TcpStream,
    status: u16,
    response: &str,
    seen: &Mutex<Vec<serde_json::Value>>,
) {
    let mut reader = BufReader::new(stream);
    let mut content_length = 0;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    let tracked = body["requests"].as_array().map(|r| r.len()).unwrap_or(0);
    seen.lock().unwrap().push(body);

    let payload = response.replace("{tracked}", &tracked.to_string());
    let reply = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(reply.as_bytes());
    let _ = stream.flush();
}
