// CLI-specific types and structures
// This module contains the command-line interface definitions and parsing logic

use clap::Parser;
use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatsFormat {
    #[default]
    Table,
    Json,
}

// CLI structure - contains all command-line arguments and options
#[derive(Parser, Debug)]
#[command(name = "loghit")]
#[command(about = "Import web server access logs into an analytics tracker")]
#[command(
    long_about = "Import web server access logs into an analytics tracker\n\nlog files may be plain, gzip, bzip2 or zstd compressed; use - to read from stdin.\nBy default loghit produces clean reports: bots, static files, HTTP errors and\nredirects are excluded. Every exclusion can be turned off, see the options below.\n\nCOMMON EXAMPLES:\n  loghit --url https://stats.example.com --idsite 1 access.log\n  loghit --dry-run --site www.example.com=1 access.log.gz\n  loghit --log-format-name w3c_extended --w3c-fields '#Fields: date time c-ip cs-uri-stem' ex.log"
)]
#[command(author = "Dirk Loss <mail@dirk-loss.de>")]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Log files to import ("-" reads from stdin)
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Skip the first N lines of each log file (to resume a failed import)
    #[arg(long = "skip", default_value_t = 0, help_heading = "Input Options")]
    pub skip: usize,

    /// Log file encoding (any WHATWG label, e.g. utf-8, latin1, windows-1252)
    #[arg(long = "encoding", default_value = "utf8", help_heading = "Input Options")]
    pub encoding: String,

    /// Log format to use instead of auto-detection
    #[arg(
        long = "log-format-name",
        help_heading = "Format Options",
        help = "Log format to use instead of auto-detection.\n\nSupported: common, common_vhost, ncsa_extended, common_complete, w3c_extended, amazon_cloudfront, iis, s3, icecast2, nginx_json"
    )]
    pub log_format_name: Option<String>,

    /// Regular expression with named groups used to parse log lines. Overrides --log-format-name
    #[arg(
        long = "log-format-regex",
        help_heading = "Format Options",
        help = "Regular expression used to parse log lines. Overrides --log-format-name.\n\nThe regex must contain named groups. Recognized groups: date, path, query_string, ip, user_agent, referrer, status, length, host, userid, generation_time_milli, event_action, event_name, timezone, session_time"
    )]
    pub log_format_regex: Option<String>,

    /// Print the regex used to parse the first log file and exit
    #[arg(long = "dump-log-regex", help_heading = "Format Options")]
    pub dump_log_regex: bool,

    /// '#Fields:' line for W3C files that lack one, e.g. '#Fields: date time c-ip ...'
    #[arg(long = "w3c-fields", help_heading = "Format Options")]
    pub w3c_fields: Option<String>,

    /// Map a custom W3C field to a default one (custom=default, repeatable)
    #[arg(
        long = "w3c-map-field",
        value_name = "CUSTOM=DEFAULT",
        value_parser = parse_key_value,
        help_heading = "Format Options"
    )]
    pub w3c_map_field: Vec<(String, String)>,

    /// Regex for a W3C field (field=regex with a named group, repeatable)
    #[arg(
        long = "w3c-field-regex",
        value_name = "FIELD=REGEX",
        value_parser = parse_key_value,
        help_heading = "Format Options"
    )]
    pub w3c_field_regex: Vec<(String, String)>,

    /// Interpret the W3C time-taken field as milliseconds (required for IIS logs)
    #[arg(long = "w3c-time-taken-millisecs", help_heading = "Format Options")]
    pub w3c_time_taken_millisecs: bool,

    /// Comma separated regex groups to ignore when parsing lines
    #[arg(long = "ignore-groups", value_delimiter = ',', help_heading = "Format Options")]
    pub ignore_groups: Vec<String>,

    /// Track a regex group as a page-scope custom variable (group=name, repeatable)
    #[arg(
        long = "regex-group-to-page-cvar",
        value_name = "GROUP=NAME",
        value_parser = parse_key_value,
        help_heading = "Format Options"
    )]
    pub regex_group_to_page_cvar: Vec<(String, String)>,

    /// Track a regex group as a visit-scope custom variable (group=name, repeatable)
    #[arg(
        long = "regex-group-to-visit-cvar",
        value_name = "GROUP=NAME",
        value_parser = parse_key_value,
        help_heading = "Format Options"
    )]
    pub regex_group_to_visit_cvar: Vec<(String, String)>,

    /// Hostname to use for formats that do not include one
    #[arg(long = "log-hostname", help_heading = "Format Options")]
    pub log_hostname: Option<String>,

    /// Accepted hostname glob; other hostnames are excluded (repeatable)
    #[arg(long = "hostname", help_heading = "Filtering Options")]
    pub hostnames: Vec<String>,

    /// Path glob to exclude (repeatable)
    #[arg(long = "exclude-path", help_heading = "Filtering Options")]
    pub exclude_path: Vec<String>,

    /// File with one path glob to exclude per line
    #[arg(long = "exclude-path-from", help_heading = "Filtering Options")]
    pub exclude_path_from: Option<String>,

    /// Path glob to include; when given, other paths are excluded (repeatable)
    #[arg(long = "include-path", help_heading = "Filtering Options")]
    pub include_path: Vec<String>,

    /// File with one path glob to include per line
    #[arg(long = "include-path-from", help_heading = "Filtering Options")]
    pub include_path_from: Option<String>,

    /// User agent substring to exclude, in addition to the built-in bot list (repeatable)
    #[arg(long = "useragent-exclude", help_heading = "Filtering Options")]
    pub useragent_exclude: Vec<String>,

    /// Track static files (images, css, js, ico, ttf, ...)
    #[arg(long = "enable-static", help_heading = "Filtering Options")]
    pub enable_static: bool,

    /// Track bots; they get a 'Bot' custom variable holding their user agent
    #[arg(long = "enable-bots", help_heading = "Filtering Options")]
    pub enable_bots: bool,

    /// Track HTTP errors (status 4xx and 5xx)
    #[arg(long = "enable-http-errors", help_heading = "Filtering Options")]
    pub enable_http_errors: bool,

    /// Track HTTP redirects (status 3xx except 304)
    #[arg(long = "enable-http-redirects", help_heading = "Filtering Options")]
    pub enable_http_redirects: bool,

    /// Comma separated extensions to track as downloads; other known downloads are skipped
    #[arg(long = "download-extensions", value_delimiter = ',', help_heading = "Filtering Options")]
    pub download_extensions: Option<Vec<String>>,

    /// Query string delimiter
    #[arg(
        long = "query-string-delimiter",
        default_value = "?",
        help_heading = "Filtering Options"
    )]
    pub query_string_delimiter: String,

    /// Strip the query string from the URL
    #[arg(long = "strip-query-string", help_heading = "Filtering Options")]
    pub strip_query_string: bool,

    /// Lowercase URL paths so paths differing only in case are treated the same
    #[arg(long = "force-lowercase-path", help_heading = "Filtering Options")]
    pub force_lowercase_path: bool,

    /// Replay tracking requests found in the logs
    #[arg(long = "replay-tracking", help_heading = "Replay Options")]
    pub replay_tracking: bool,

    /// Path suffix of the tracking requests to replay
    #[arg(
        long = "replay-tracking-expected-tracker-file",
        default_value = "piwik.php",
        help_heading = "Replay Options"
    )]
    pub replay_tracking_expected_tracker_file: String,

    /// Record every hit in this site ID, regardless of hostname
    #[arg(long = "idsite", help_heading = "Site Options")]
    pub idsite: Option<u32>,

    /// Site ID for hostnames that match no known site
    #[arg(long = "idsite-fallback", help_heading = "Site Options")]
    pub idsite_fallback: Option<u32>,

    /// Known site for a hostname (host=id, repeatable)
    #[arg(
        long = "site",
        value_name = "HOST=ID",
        value_parser = parse_site_mapping,
        help_heading = "Site Options"
    )]
    pub sites: Vec<(String, u32)>,

    /// Create a site for every hostname that matches no known site
    #[arg(long = "add-sites-new-hosts", help_heading = "Site Options")]
    pub add_sites_new_hosts: bool,

    /// Tracker base URL, e.g. https://stats.example.com/
    #[arg(long = "url", help_heading = "Recording Options")]
    pub url: Option<String>,

    /// token_auth sent with bulk tracking requests
    #[arg(long = "token-auth", help_heading = "Recording Options")]
    pub token_auth: Option<String>,

    /// Parse and classify without sending anything to the tracker
    #[arg(long = "dry-run", help_heading = "Recording Options")]
    pub dry_run: bool,

    /// Number of parallel recorders
    #[arg(long = "recorders", default_value_t = 1, help_heading = "Recording Options")]
    pub recorders: usize,

    /// Maximum number of hits in one tracking request
    #[arg(
        long = "recorder-max-payload-size",
        default_value_t = 200,
        help_heading = "Recording Options"
    )]
    pub recorder_max_payload_size: usize,

    /// Send one hit per request instead of bulk requests
    #[arg(long = "disable-bulk-tracking", help_heading = "Recording Options")]
    pub disable_bulk_tracking: bool,

    /// Debug option: each recorder sends one hit every N seconds
    #[arg(
        long = "debug-force-one-hit-every-Ns",
        value_name = "SECONDS",
        help_heading = "Recording Options"
    )]
    pub force_one_hit_interval: Option<f64>,

    /// Maximum number of attempts for a failed tracking request
    #[arg(long = "retry-max-attempts", default_value_t = 3, help_heading = "Recording Options")]
    pub retry_max_attempts: u32,

    /// Delay between attempts (seconds, or a duration like 500ms or 1m)
    #[arg(
        long = "retry-delay",
        default_value = "10",
        value_parser = parse_duration,
        help_heading = "Recording Options"
    )]
    pub retry_delay: Duration,

    /// Timeout of one tracking request (seconds, or a duration like 30s)
    #[arg(
        long = "request-timeout",
        default_value = "300",
        value_parser = parse_duration,
        help_heading = "Recording Options"
    )]
    pub request_timeout: Duration,

    /// Page title category delimiter used for tracked HTTP errors
    #[arg(
        long = "title-category-delimiter",
        default_value = "/",
        help_heading = "Recording Options"
    )]
    pub title_category_delimiter: String,

    /// Print progress periodically (default when stdout is a terminal)
    #[arg(long = "show-progress", help_heading = "Output Options")]
    pub show_progress: bool,

    /// Never print progress
    #[arg(
        long = "no-progress",
        help_heading = "Output Options",
        overrides_with = "show_progress"
    )]
    pub no_progress: bool,

    /// Seconds between progress reports
    #[arg(
        long = "show-progress-delay",
        default_value_t = 1,
        help_heading = "Output Options"
    )]
    pub show_progress_delay: u64,

    /// Format of the final summary
    #[arg(
        long = "stats-format",
        value_enum,
        default_value = "table",
        help_heading = "Output Options"
    )]
    pub stats_format: StatsFormat,

    /// Enable debug output (repeat for more verbosity: -d, -dd)
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count, help_heading = "Output Options")]
    pub debug: u8,

    /// Specify custom configuration file path
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore configuration file
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,
}

impl Cli {
    /// Resolve inverted boolean flags and terminal-dependent defaults
    pub fn resolve_boolean_flags(&mut self, stdout_is_tty: bool) {
        if self.no_progress {
            self.show_progress = false;
        } else if !self.show_progress {
            self.show_progress = stdout_is_tty;
        }

        if self.recorders == 0 {
            self.recorders = 1;
        }
    }
}

/// Parse `key=value`; the value may itself contain '='
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn parse_site_mapping(s: &str) -> Result<(String, u32), String> {
    let (host, id) = parse_key_value(s)?;
    let id = id
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid site ID in '{}'", s))?;
    Ok((host.to_lowercase(), id))
}

/// Bare numbers are seconds; anything else goes through humantime
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        // Rejects negative, non-finite and out-of-range values
        return Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid duration '{}': {}", s, e));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{}': {}", s, e))
}
