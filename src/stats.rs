//! Run-wide counters, site bookkeeping and progress reporting.
//!
//! Counters are the only state written by several threads: the producer
//! counts parsing and filtering outcomes, recorder threads count recorded
//! hits. Everything else in the pipeline is moved, not shared.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{never, select, tick, Receiver, Sender};
use serde::Serialize;

use crate::platform::Ctrl;

/// Monotonic atomic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn advance(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct SiteBook {
    used: BTreeSet<u32>,
    created: Vec<(String, u32)>,
    ignored: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Timer {
    start: Option<Instant>,
    stop: Option<Instant>,
}

/// Shared statistics for one import run
#[derive(Debug, Default)]
pub struct StatsRegistry {
    pub lines_read: Counter,
    pub parsed: Counter,
    pub recorded: Counter,
    pub invalid: Counter,
    pub malformed: Counter,
    pub no_site: Counter,
    pub hostname_skipped: Counter,
    pub static_: Counter,
    pub skipped_user_agent: Counter,
    pub skipped_http_errors: Counter,
    pub skipped_http_redirects: Counter,
    pub downloads: Counter,
    pub skipped_downloads: Counter,
    pub skipped_path: Counter,

    sites: Mutex<SiteBook>,
    timer: Mutex<Timer>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Counters stay meaningful even if a recorder panicked while holding the lock
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_timer(&self) {
        let mut timer = lock(&self.timer);
        timer.start = Some(Instant::now());
        timer.stop = None;
    }

    pub fn stop_timer(&self) {
        let mut timer = lock(&self.timer);
        if timer.start.is_some() && timer.stop.is_none() {
            timer.stop = Some(Instant::now());
        }
    }

    /// Time since the timer started, frozen once it is stopped
    pub fn elapsed(&self) -> Duration {
        let timer = lock(&self.timer);
        match (timer.start, timer.stop) {
            (Some(start), Some(stop)) => stop.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn site_used(&self, site_id: u32) {
        lock(&self.sites).used.insert(site_id);
    }

    pub fn site_created(&self, hostname: &str, site_id: u32) {
        let mut sites = lock(&self.sites);
        sites.created.push((hostname.to_string(), site_id));
        sites.used.insert(site_id);
    }

    pub fn site_ignored(&self, hostname: &str) {
        lock(&self.sites).ignored.insert(hostname.to_string());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let sites = lock(&self.sites);
        let created_ids: BTreeSet<u32> = sites.created.iter().map(|(_, id)| *id).collect();
        let elapsed = self.elapsed();
        let recorded = self.recorded.get();

        let rejections = [
            self.malformed.get(),
            self.no_site.get(),
            self.hostname_skipped.get(),
            self.static_.get(),
            self.skipped_user_agent.get(),
            self.skipped_http_errors.get(),
            self.skipped_http_redirects.get(),
            self.skipped_downloads.get(),
            self.skipped_path.get(),
        ];

        StatsSnapshot {
            lines_read: self.lines_read.get(),
            parsed: self.parsed.get(),
            recorded,
            downloads: self.downloads.get(),
            total_ignored: self.invalid.get() + rejections.iter().sum::<u64>(),
            invalid: self.invalid.get(),
            malformed: self.malformed.get(),
            no_site: self.no_site.get(),
            hostname_skipped: self.hostname_skipped.get(),
            static_resources: self.static_.get(),
            skipped_user_agent: self.skipped_user_agent.get(),
            skipped_http_errors: self.skipped_http_errors.get(),
            skipped_http_redirects: self.skipped_http_redirects.get(),
            skipped_downloads: self.skipped_downloads.get(),
            skipped_path: self.skipped_path.get(),
            sites: SiteSummary {
                total: sites.used.len(),
                existing: sites.used.difference(&created_ids).count(),
                created: sites
                    .created
                    .iter()
                    .map(|(hostname, id)| CreatedSite {
                        hostname: hostname.clone(),
                        id: *id,
                    })
                    .collect(),
                ignored_hostnames: sites.ignored.iter().cloned().collect(),
            },
            elapsed_secs: elapsed.as_secs_f64(),
            records_per_second: compute_speed(recorded, elapsed),
        }
    }

    /// One progress line: totals, average rate and rate since `previous_recorded`
    pub fn progress_line(&self, previous_recorded: u64, interval: Duration) -> String {
        let recorded = self.recorded.get();
        let elapsed = self.elapsed().as_secs_f64();
        let average = if elapsed > 0.0 {
            recorded as f64 / elapsed
        } else {
            0.0
        };
        let interval = interval.as_secs_f64();
        let current = if interval > 0.0 {
            recorded.saturating_sub(previous_recorded) as f64 / interval
        } else {
            0.0
        };
        format!(
            "{} lines parsed, {} lines recorded, {} records/sec (avg), {} records/sec (current)",
            self.parsed.get(),
            recorded,
            average as u64,
            current as u64
        )
    }
}

/// `None` when the rate cannot be measured (no elapsed time)
fn compute_speed(value: u64, elapsed: Duration) -> Option<f64> {
    if value == 0 {
        return Some(0.0);
    }
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        None
    } else {
        Some((value as f64 / secs * 100.0).round() / 100.0)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreatedSite {
    pub hostname: String,
    pub id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteSummary {
    pub total: usize,
    pub existing: usize,
    pub created: Vec<CreatedSite>,
    pub ignored_hostnames: Vec<String>,
}

/// Point-in-time copy of every counter, used for the final summary
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub parsed: u64,
    pub recorded: u64,
    pub downloads: u64,
    pub total_ignored: u64,
    pub invalid: u64,
    pub malformed: u64,
    pub no_site: u64,
    pub hostname_skipped: u64,
    #[serde(rename = "static")]
    pub static_resources: u64,
    pub skipped_user_agent: u64,
    pub skipped_http_errors: u64,
    pub skipped_http_redirects: u64,
    pub skipped_downloads: u64,
    pub skipped_path: u64,
    pub sites: SiteSummary,
    pub elapsed_secs: f64,
    pub records_per_second: Option<f64>,
}

const IGNORED_SITES_TIPS: &str = "
        TIPs:
         - if one of these hosts is an alias host for one of the websites,
           add this host as an alias URL of that website.
         - use --site HOST=ID to map these hosts to existing sites.
         - use --add-sites-new-hosts to create one site per new host
           rather than discarding these requests.
         - use --idsite-fallback to record all these lines in a specific site.
         - use --idsite to record all lines in one site.
";

impl StatsSnapshot {
    /// Sum of recorded hits and every post-match rejection; equals `parsed`
    /// once all dispatched hits have been recorded
    pub fn accounted(&self) -> u64 {
        self.recorded + self.total_ignored - self.invalid
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary, printed at the end of a run
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "Logs import summary");
        let _ = writeln!(out, "-------------------");
        let _ = writeln!(out);
        let _ = writeln!(out, "    {} requests imported successfully", self.recorded);
        let _ = writeln!(out, "    {} requests were downloads", self.downloads);
        let _ = writeln!(out, "    {} requests ignored:", self.total_ignored);
        let ignored = [
            (self.skipped_http_errors, "HTTP errors"),
            (self.skipped_http_redirects, "HTTP redirects"),
            (self.invalid, "invalid log lines"),
            (self.malformed, "log lines with missing or unusable fields"),
            (self.no_site, "requests did not match any known site"),
            (self.hostname_skipped, "requests did not match any --hostname"),
            (self.skipped_user_agent, "requests done by bots, search engines..."),
            (
                self.static_resources,
                "requests to static resources (css, js, images, ico, ttf...)",
            ),
            (
                self.skipped_downloads,
                "requests to file downloads did not match any --download-extensions",
            ),
            (
                self.skipped_path,
                "requests excluded by --exclude-path or --include-path",
            ),
        ];
        for (count, label) in ignored {
            let _ = writeln!(out, "        {} {}", count, label);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Website import summary");
        let _ = writeln!(out, "----------------------");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "    {} requests imported to {} sites",
            self.recorded, self.sites.total
        );
        let _ = writeln!(out, "        {} sites already existed", self.sites.existing);
        let _ = writeln!(out, "        {} sites were created:", self.sites.created.len());
        for site in &self.sites.created {
            let _ = writeln!(out, "            {} (ID: {})", site.hostname, site.id);
        }
        let _ = writeln!(
            out,
            "    {} distinct hostnames did not match any existing site:",
            self.sites.ignored_hostnames.len()
        );
        for hostname in &self.sites.ignored_hostnames {
            let _ = writeln!(out, "            {}", hostname);
        }
        if !self.sites.ignored_hostnames.is_empty() {
            out.push_str(IGNORED_SITES_TIPS);
        }

        let speed = match self.records_per_second {
            Some(speed) => speed.to_string(),
            None => "very high!".to_string(),
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "Performance summary");
        let _ = writeln!(out, "-------------------");
        let _ = writeln!(out);
        let _ = writeln!(out, "    Total time: {} seconds", self.elapsed_secs as u64);
        let _ = writeln!(
            out,
            "    Requests imported per second: {} requests per second",
            speed
        );
        out
    }
}

/// Background thread printing progress lines.
///
/// Ticks every `interval` when periodic progress is enabled and always
/// answers `Ctrl::PrintStats` requests from the signal handler.
pub struct ProgressMonitor {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl ProgressMonitor {
    pub fn spawn(
        stats: Arc<StatsRegistry>,
        interval: Option<Duration>,
        ctrl_rx: Receiver<Ctrl>,
    ) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::spawn(move || {
            let ticker = interval.map(tick).unwrap_or_else(never);
            let period = interval.unwrap_or(Duration::from_secs(1));
            let mut ctrl_rx = ctrl_rx;
            let mut previous_recorded = 0;
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        eprintln!("{}", stats.progress_line(previous_recorded, period));
                        previous_recorded = stats.recorded.get();
                    }
                    recv(ctrl_rx) -> msg => {
                        match msg {
                            Ok(Ctrl::PrintStats) => {
                                eprintln!("{}", stats.progress_line(previous_recorded, period));
                            }
                            Ok(Ctrl::Shutdown { .. }) => {}
                            Err(_) => ctrl_rx = never(),
                        }
                    }
                }
            }
        });
        Self { stop_tx, handle }
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::warn!("progress monitor thread panicked");
        }
    }
}
