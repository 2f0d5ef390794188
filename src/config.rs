use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::cli::{Cli, StatsFormat};
use crate::error::ImportError;
use crate::filters::DOWNLOAD_EXTENSIONS;
use crate::formats::W3cOptions;

/// Main configuration, built once from the command line and shared read-only
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub input: InputConfig,
    pub extraction: ExtractionConfig,
    pub filters: FilterConfig,
    pub sites: SiteConfig,
    pub recording: RecordingConfig,
    pub output: OutputConfig,
}

/// How the log format of each file is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatChoice {
    Detect,
    Named(String),
    Regex(String),
}

#[derive(Debug, Clone)]
pub struct InputConfig {
    pub files: Vec<String>,
    pub encoding: String,
    /// Physical lines skipped at the start of each file
    pub skip: usize,
    pub format: FormatChoice,
    pub w3c: W3cOptions,
    pub dump_log_regex: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub query_string_delimiter: String,
    pub strip_query_string: bool,
    pub force_lowercase_path: bool,
    pub log_hostname: Option<String>,
    pub ignore_groups: Vec<String>,
    /// `(regex group, custom variable name)`
    pub page_cvar_groups: Vec<(String, String)>,
    pub visit_cvar_groups: Vec<(String, String)>,
    pub replay_tracking: bool,
    pub tracker_file: String,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub hostnames: Vec<String>,
    pub excluded_paths: Vec<String>,
    pub included_paths: Vec<String>,
    /// Lowercased user-agent substrings, in addition to the built-in list
    pub excluded_useragents: Vec<String>,
    pub enable_static: bool,
    pub enable_bots: bool,
    pub enable_http_errors: bool,
    pub enable_http_redirects: bool,
    /// Extensions tracked as downloads
    pub download_extensions: HashSet<String>,
    pub replay_tracking: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SiteConfig {
    pub site_id: Option<u32>,
    pub site_id_fallback: Option<u32>,
    pub add_sites_new_hosts: bool,
    /// Known `(hostname, site id)` pairs
    pub known_sites: Vec<(String, u32)>,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub recorders: usize,
    pub max_payload_size: usize,
    pub bulk: bool,
    pub force_one_hit_interval: Option<Duration>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    pub url: Option<String>,
    pub token_auth: Option<String>,
    pub dry_run: bool,
    pub title_category_delimiter: String,
    pub replay_tracking: bool,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub show_progress: bool,
    pub progress_delay: Duration,
    pub stats_format: StatsFormat,
}

impl ImportConfig {
    /// Create configuration from CLI arguments, reading `--*-path-from` files
    pub fn from_cli(cli: &Cli) -> Result<Self, ImportError> {
        let format = if let Some(regex) = &cli.log_format_regex {
            FormatChoice::Regex(regex.clone())
        } else if let Some(name) = &cli.log_format_name {
            FormatChoice::Named(name.clone())
        } else {
            FormatChoice::Detect
        };

        let w3c = W3cOptions {
            fields_line: cli.w3c_fields.clone(),
            time_taken_millis: cli.w3c_time_taken_millisecs,
            mapped_fields: cli.w3c_map_field.clone(),
            field_regexes: cli.w3c_field_regex.clone(),
        };
        w3c.validate()?;

        let mut excluded_paths = cli.exclude_path.clone();
        if let Some(path) = &cli.exclude_path_from {
            excluded_paths.extend(read_pattern_file(Path::new(path))?);
        }
        let mut included_paths = cli.include_path.clone();
        if let Some(path) = &cli.include_path_from {
            included_paths.extend(read_pattern_file(Path::new(path))?);
        }
        dedup(&mut excluded_paths);
        dedup(&mut included_paths);

        let download_extensions = match &cli.download_extensions {
            Some(list) => list
                .iter()
                .map(|ext| ext.trim().to_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
            None => DOWNLOAD_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        };

        if cli.recorder_max_payload_size == 0 {
            return Err(ImportError::Config(
                "--recorder-max-payload-size must be at least 1".to_string(),
            ));
        }
        if cli.retry_max_attempts == 0 {
            return Err(ImportError::Config(
                "--retry-max-attempts must be at least 1".to_string(),
            ));
        }
        if !cli.dry_run && !cli.dump_log_regex && cli.url.is_none() {
            return Err(ImportError::Config(
                "--url is required unless --dry-run is used".to_string(),
            ));
        }

        let force_one_hit_interval = match cli.force_one_hit_interval {
            Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(secs) if secs != 0.0 => {
                return Err(ImportError::Config(format!(
                    "invalid --debug-force-one-hit-every-Ns value: {}",
                    secs
                )))
            }
            _ => None,
        };

        let config = Self {
            input: InputConfig {
                files: cli.files.clone(),
                encoding: cli.encoding.clone(),
                skip: cli.skip,
                format,
                w3c,
                dump_log_regex: cli.dump_log_regex,
            },
            extraction: ExtractionConfig {
                query_string_delimiter: cli.query_string_delimiter.clone(),
                strip_query_string: cli.strip_query_string,
                force_lowercase_path: cli.force_lowercase_path,
                log_hostname: cli.log_hostname.clone(),
                ignore_groups: cli.ignore_groups.clone(),
                page_cvar_groups: cli.regex_group_to_page_cvar.clone(),
                visit_cvar_groups: cli.regex_group_to_visit_cvar.clone(),
                replay_tracking: cli.replay_tracking,
                tracker_file: cli.replay_tracking_expected_tracker_file.to_lowercase(),
            },
            filters: FilterConfig {
                hostnames: cli.hostnames.clone(),
                excluded_paths,
                included_paths,
                excluded_useragents: cli
                    .useragent_exclude
                    .iter()
                    .map(|ua| ua.to_lowercase())
                    .collect(),
                enable_static: cli.enable_static,
                enable_bots: cli.enable_bots,
                enable_http_errors: cli.enable_http_errors,
                enable_http_redirects: cli.enable_http_redirects,
                download_extensions,
                replay_tracking: cli.replay_tracking,
            },
            sites: SiteConfig {
                site_id: cli.idsite,
                site_id_fallback: cli.idsite_fallback,
                add_sites_new_hosts: cli.add_sites_new_hosts,
                known_sites: cli.sites.clone(),
            },
            recording: RecordingConfig {
                recorders: cli.recorders.max(1),
                max_payload_size: cli.recorder_max_payload_size,
                bulk: !cli.disable_bulk_tracking,
                force_one_hit_interval,
                max_attempts: cli.retry_max_attempts,
                retry_delay: cli.retry_delay,
                request_timeout: cli.request_timeout,
                url: cli.url.clone(),
                token_auth: cli.token_auth.clone(),
                dry_run: cli.dry_run,
                title_category_delimiter: cli.title_category_delimiter.clone(),
                replay_tracking: cli.replay_tracking,
            },
            output: OutputConfig {
                show_progress: cli.show_progress,
                progress_delay: Duration::from_secs(cli.show_progress_delay.max(1)),
                stats_format: cli.stats_format,
            },
        };

        tracing::debug!(
            hostnames = ?config.filters.hostnames,
            excluded_paths = ?config.filters.excluded_paths,
            included_paths = ?config.filters.included_paths,
            "filter configuration"
        );

        Ok(config)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            query_string_delimiter: "?".to_string(),
            strip_query_string: false,
            force_lowercase_path: false,
            log_hostname: None,
            ignore_groups: Vec::new(),
            page_cvar_groups: Vec::new(),
            visit_cvar_groups: Vec::new(),
            replay_tracking: false,
            tracker_file: "piwik.php".to_string(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            hostnames: Vec::new(),
            excluded_paths: Vec::new(),
            included_paths: Vec::new(),
            excluded_useragents: Vec::new(),
            enable_static: false,
            enable_bots: false,
            enable_http_errors: false,
            enable_http_redirects: false,
            download_extensions: DOWNLOAD_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            replay_tracking: false,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            recorders: 1,
            max_payload_size: 200,
            bulk: true,
            force_one_hit_interval: None,
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            url: None,
            token_auth: None,
            dry_run: true,
            title_category_delimiter: "/".to_string(),
            replay_tracking: false,
        }
    }
}

/// One pattern per non-empty line
fn read_pattern_file(path: &Path) -> Result<Vec<String>, ImportError> {
    let content = std::fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn dedup(patterns: &mut Vec<String>) {
    let mut seen = HashSet::new();
    patterns.retain(|p| seen.insert(p.clone()));
}
