//! Inclusion/exclusion checks applied to every extracted hit.
//!
//! Checks run in a fixed order and the first rejection wins. Each rejection
//! maps to exactly one counter in [`StatsRegistry`].

use std::collections::HashSet;

use glob::Pattern;
use once_cell::sync::Lazy;

use crate::config::FilterConfig;
use crate::error::ImportError;
use crate::hit::Hit;
use crate::stats::StatsRegistry;

pub static STATIC_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    "gif jpg jpeg png bmp ico svg svgz ttf otf eot woff class swf css js xml robots.txt"
        .split_whitespace()
        .collect()
});

pub static DOWNLOAD_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    "7z aac arc arj asf asx avi bin csv deb dmg doc docx exe flv gz gzip hqx \
     ibooks jar mpg mp2 mp3 mp4 mpeg mov movie msi msp odb odf odg odp \
     ods odt ogg ogv pdf phps ppt pptx qt qtm ra ram rar rpm sea sit tar tbz \
     bz2 tgz torrent txt wav wma wmv wpd xls xlsx xml xsd z zip \
     azw3 epub mobi apk"
        .split_whitespace()
        .collect()
});

/// Case-insensitive user-agent substrings of crawlers and tools
pub const EXCLUDED_USER_AGENTS: &[&str] = &[
    "adsbot-google",
    "ask jeeves",
    "baidubot",
    "bot-",
    "bot/",
    "ccooter/",
    "crawl",
    "curl",
    "echoping",
    "exabot",
    "feed",
    "googlebot",
    "ia_archiver",
    "java/",
    "libwww",
    "mediapartners-google",
    "msnbot",
    "netcraftsurvey",
    "panopta",
    "robot",
    "spider",
    "surveybot",
    "twiceler",
    "voilabot",
    "yahoo",
    "yandex",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Hostname,
    Static,
    Download,
    UserAgent,
    HttpError,
    HttpRedirect,
    Path,
}

/// Evaluation order of the chain
pub const CHECK_ORDER: [Check; 7] = [
    Check::Hostname,
    Check::Static,
    Check::Download,
    Check::UserAgent,
    Check::HttpError,
    Check::HttpRedirect,
    Check::Path,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Hostname,
    Static,
    Download,
    UserAgent,
    HttpError,
    HttpRedirect,
    Path,
}

impl Rejection {
    fn count(self, stats: &StatsRegistry) {
        match self {
            Rejection::Hostname => stats.hostname_skipped.increment(),
            Rejection::Static => stats.static_.increment(),
            Rejection::Download => stats.skipped_downloads.increment(),
            Rejection::UserAgent => stats.skipped_user_agent.increment(),
            Rejection::HttpError => stats.skipped_http_errors.increment(),
            Rejection::HttpRedirect => stats.skipped_http_redirects.increment(),
            Rejection::Path => stats.skipped_path.increment(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

/// Compiled filter configuration
#[derive(Debug)]
pub struct FilterChain {
    hostnames: Vec<Pattern>,
    excluded_paths: Vec<Pattern>,
    included_paths: Vec<Pattern>,
    excluded_useragents: Vec<String>,
    download_extensions: HashSet<String>,
    enable_static: bool,
    enable_bots: bool,
    enable_http_errors: bool,
    enable_http_redirects: bool,
    replay_tracking: bool,
}

fn compile_patterns(patterns: &[String], option: &str) -> Result<Vec<Pattern>, ImportError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| ImportError::Config(format!("invalid {} pattern '{}': {}", option, p, e)))
        })
        .collect()
}

impl FilterChain {
    pub fn new(config: &FilterConfig) -> Result<Self, ImportError> {
        Ok(Self {
            hostnames: compile_patterns(&config.hostnames, "--hostname")?,
            excluded_paths: compile_patterns(&config.excluded_paths, "--exclude-path")?,
            included_paths: compile_patterns(&config.included_paths, "--include-path")?,
            excluded_useragents: config.excluded_useragents.clone(),
            download_extensions: config.download_extensions.clone(),
            enable_static: config.enable_static,
            enable_bots: config.enable_bots,
            enable_http_errors: config.enable_http_errors,
            enable_http_redirects: config.enable_http_redirects,
            replay_tracking: config.replay_tracking,
        })
    }

    /// Run every check in order, flagging the hit as checks accept it.
    ///
    /// A rejection is counted before it is returned.
    pub fn evaluate(&self, hit: &mut Hit, stats: &StatsRegistry) -> Verdict {
        for check in CHECK_ORDER {
            if let Err(rejection) = self.apply(check, hit, stats) {
                rejection.count(stats);
                return Verdict::Reject(rejection);
            }
        }
        Verdict::Accept
    }

    fn apply(&self, check: Check, hit: &mut Hit, stats: &StatsRegistry) -> Result<(), Rejection> {
        match check {
            Check::Hostname => self.check_hostname(hit),
            Check::Static => self.check_static(hit),
            Check::Download => self.check_download(hit, stats),
            Check::UserAgent => self.check_user_agent(hit),
            Check::HttpError => self.check_http_error(hit),
            Check::HttpRedirect => self.check_http_redirect(hit),
            Check::Path => self.check_path(hit),
        }
    }

    fn check_hostname(&self, hit: &Hit) -> Result<(), Rejection> {
        let Some(host) = &hit.host else {
            return Ok(());
        };
        if self.hostnames.is_empty() || self.hostnames.iter().any(|p| p.matches(host)) {
            Ok(())
        } else {
            Err(Rejection::Hostname)
        }
    }

    fn check_static(&self, hit: &mut Hit) -> Result<(), Rejection> {
        if !STATIC_EXTENSIONS.contains(hit.extension.as_str()) {
            return Ok(());
        }
        if self.enable_static {
            hit.is_static = true;
            hit.is_download = true;
            Ok(())
        } else {
            Err(Rejection::Static)
        }
    }

    fn check_download(&self, hit: &mut Hit, stats: &StatsRegistry) -> Result<(), Rejection> {
        if self.download_extensions.contains(&hit.extension) {
            stats.downloads.increment();
            hit.is_download = true;
            Ok(())
        } else if DOWNLOAD_EXTENSIONS.contains(hit.extension.as_str()) {
            // Known download type left out of --download-extensions
            Err(Rejection::Download)
        } else {
            Ok(())
        }
    }

    fn check_user_agent(&self, hit: &mut Hit) -> Result<(), Rejection> {
        let user_agent = hit.user_agent.to_lowercase();
        let is_excluded = EXCLUDED_USER_AGENTS
            .iter()
            .copied()
            .chain(self.excluded_useragents.iter().map(String::as_str))
            .any(|needle| user_agent.contains(needle));
        if !is_excluded {
            return Ok(());
        }
        if self.enable_bots {
            hit.is_robot = true;
            Ok(())
        } else {
            Err(Rejection::UserAgent)
        }
    }

    fn check_http_error(&self, hit: &mut Hit) -> Result<(), Rejection> {
        if !(hit.is_status_class(b'4') || hit.is_status_class(b'5')) {
            return Ok(());
        }
        if self.replay_tracking {
            // Replayed requests are imported whatever the tracker answered the first time
            Ok(())
        } else if self.enable_http_errors {
            hit.is_error = true;
            Ok(())
        } else {
            Err(Rejection::HttpError)
        }
    }

    fn check_http_redirect(&self, hit: &mut Hit) -> Result<(), Rejection> {
        if !hit.is_status_class(b'3') || hit.status == "304" {
            return Ok(());
        }
        if self.enable_http_redirects {
            hit.is_redirect = true;
            Ok(())
        } else {
            Err(Rejection::HttpRedirect)
        }
    }

    fn check_path(&self, hit: &Hit) -> Result<(), Rejection> {
        if self.excluded_paths.iter().any(|p| p.matches(&hit.path)) {
            return Err(Rejection::Path);
        }
        if self.included_paths.is_empty() || self.included_paths.iter().any(|p| p.matches(&hit.path)) {
            Ok(())
        } else {
            Err(Rejection::Path)
        }
    }
}
