//! Turning a matched line into a `Hit`
//!
//! Building happens in two steps around the filter chain: `build` extracts
//! everything the filters look at, `finish` does the expensive part (date
//! parsing, replay argument decoding) only for hits that were accepted.

use chrono::{Duration, NaiveDateTime};
use std::borrow::Cow;

use crate::config::ExtractionConfig;
use crate::error::LineRejection;
use crate::formats::{FieldMatch, LogFormat};
use crate::hit::{CustomVars, Hit, HitEvent, HitLocation};

/// A hit that passed extraction, with the fields resolved after filtering
#[derive(Debug)]
pub struct PendingHit {
    pub hit: Hit,
    date: String,
    timezone: Option<String>,
    page_cvars: Vec<(String, String)>,
    visit_cvars: Vec<(String, String)>,
}

pub struct HitBuilder<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> HitBuilder<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn build(
        &self,
        format: &LogFormat,
        mut matched: FieldMatch,
        filename: &str,
        lineno: usize,
    ) -> Result<PendingHit, LineRejection> {
        // Custom variables see the groups before --ignore-groups removes them
        let page_cvars = cvars_from_groups(format, &matched, &self.config.page_cvar_groups);
        let visit_cvars = cvars_from_groups(format, &matched, &self.config.visit_cvar_groups);

        if !self.config.ignore_groups.is_empty() {
            matched.remove_groups(&self.config.ignore_groups);
        }
        let field = |name: &str| format.field(&matched, name).ok();

        // Streaming formats have no status group
        let status = field("status")
            .map(Cow::into_owned)
            .unwrap_or_else(|| "200".to_string());
        let mut full_path = format.field(&matched, "path")?.into_owned();
        let ip = format.field(&matched, "ip")?.into_owned();
        let date = match (field("date"), field("time")) {
            (Some(date), Some(time)) => format!("{} {}", date, time),
            (Some(date), None) => date.into_owned(),
            (None, _) => return Err(LineRejection::MissingField("date".to_string())),
        };
        let timezone = field("timezone").map(Cow::into_owned);

        if self.config.force_lowercase_path {
            full_path = full_path.to_lowercase();
        }

        let (path, mut query_string) = match field("query_string") {
            Some(query) => (full_path.clone(), query.into_owned()),
            None => match full_path.split_once(self.config.query_string_delimiter.as_str()) {
                Some((path, query)) => (path.to_string(), query.to_string()),
                None => (full_path.clone(), String::new()),
            },
        };
        if query_string == "-" || self.config.strip_query_string {
            query_string.clear();
        }

        let host = match &self.config.log_hostname {
            Some(host) => Some(host.clone()),
            None => field("host").map(|host| normalize_host(&host)),
        };

        let mut hit = Hit {
            filename: filename.to_string(),
            lineno,
            ip,
            host,
            extension: extension_of(&path),
            path,
            full_path,
            query_string,
            referrer: field("referrer").map(|r| unquote_placeholder(&r)).unwrap_or_default(),
            user_agent: field("user_agent").map(|ua| unquote_placeholder(&ua)).unwrap_or_default(),
            status,
            length: field("length").and_then(|l| l.parse().ok()).unwrap_or(0),
            generation_time_milli: generation_time(&field),
            session_time: field("session_time").and_then(|s| s.parse().ok()),
            ..Default::default()
        };

        if let Some(userid) = field("userid").filter(|u| u != "-") {
            hit.args.insert("uid".to_string(), userid.to_string());
            hit.userid = Some(userid.into_owned());
        }

        if let (Some(category), Some(action)) = (field("event_category"), field("event_action")) {
            hit.event = Some(HitEvent {
                category: category.into_owned(),
                action: action.into_owned(),
                name: field("event_name")
                    .filter(|n| n != "-")
                    .map(Cow::into_owned),
            });
        }

        Ok(PendingHit {
            hit,
            date,
            timezone,
            page_cvars,
            visit_cvars,
        })
    }

    /// Resolve the timestamp and replay arguments of an accepted hit
    pub fn finish(&self, format: &LogFormat, pending: PendingHit) -> Result<Hit, LineRejection> {
        let PendingHit {
            mut hit,
            date,
            timezone,
            page_cvars,
            visit_cvars,
        } = pending;

        let local = NaiveDateTime::parse_from_str(&date, format.timestamp_layout())
            .map_err(|_| LineRejection::InvalidDate)?;
        let offset = match timezone.as_deref() {
            Some(tz) => parse_timezone_offset(tz)?,
            None => Duration::zero(),
        };
        hit.date = local - offset;

        if let Some(seconds) = hit.session_time.filter(|s| *s > 0) {
            hit.session_start =
                Duration::try_seconds(seconds).and_then(|d| hit.date.checked_sub_signed(d));
            if let Some((location, agent)) = HitLocation::split_user_agent(&hit.user_agent) {
                hit.user_agent = agent.to_string();
                hit.location = Some(location);
            }
        }

        if self.config.replay_tracking {
            self.apply_replay_arguments(&mut hit)?;
        }

        for (name, value) in &page_cvars {
            hit.add_page_custom_var(name, value);
        }
        for (name, value) in &visit_cvars {
            hit.add_visit_custom_var(name, value);
        }

        Ok(hit)
    }

    fn apply_replay_arguments(&self, hit: &mut Hit) -> Result<(), LineRejection> {
        if hit.query_string.is_empty()
            || !hit.path.to_lowercase().ends_with(&self.config.tracker_file)
        {
            return Err(LineRejection::NotTrackingRequest);
        }

        let mut site_id = None;
        for (key, value) in url::form_urlencoded::parse(hit.query_string.as_bytes()) {
            match key.as_ref() {
                "cvar" => hit.page_cvars = CustomVars::Raw(value.into_owned()),
                "_cvar" => hit.visit_cvars = CustomVars::Raw(value.into_owned()),
                "idsite" => {
                    site_id = Some(value.trim().parse::<u32>().ok());
                    hit.args.insert(key.into_owned(), value.into_owned());
                }
                _ => {
                    hit.args.insert(key.into_owned(), value.into_owned());
                }
            }
        }

        match site_id {
            Some(Some(id)) => {
                hit.site_id = Some(id);
                Ok(())
            }
            _ => Err(LineRejection::MissingSiteId),
        }
    }
}

fn cvars_from_groups(
    format: &LogFormat,
    matched: &FieldMatch,
    groups: &[(String, String)],
) -> Vec<(String, String)> {
    groups
        .iter()
        .filter_map(|(group, name)| {
            let value = format.field(matched, group).ok()?;
            // '-' is the "no value" placeholder
            (value != "-").then(|| (name.clone(), value.into_owned()))
        })
        .collect()
}

/// Lowercased text after the last '.', empty when there is none
pub fn extension_of(path: &str) -> String {
    path.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .map(|v| v.strip_suffix('"').unwrap_or(v))
        .unwrap_or(value)
}

fn unquote_placeholder(value: &str) -> String {
    match strip_quotes(value) {
        "-" => String::new(),
        other => other.to_string(),
    }
}

fn normalize_host(host: &str) -> String {
    strip_quotes(&host.to_lowercase()).trim_matches('.').to_string()
}

fn generation_time<'f>(field: &impl Fn(&str) -> Option<Cow<'f, str>>) -> f64 {
    let parse = |name: &str| field(name).and_then(|v| v.parse::<f64>().ok());
    parse("generation_time_milli")
        .or_else(|| parse("generation_time_micro").map(|us| us / 1000.0))
        .or_else(|| parse("generation_time_secs").map(|s| s * 1000.0))
        .unwrap_or(0.0)
}

/// `+HHMM` / `-HHMM` (sign optional) as an offset east of UTC
pub fn parse_timezone_offset(tz: &str) -> Result<Duration, LineRejection> {
    let tz = tz.trim();
    let (sign, digits) = match tz.as_bytes().first() {
        Some(b'-') => (-1, &tz[1..]),
        Some(b'+') => (1, &tz[1..]),
        _ => (1, tz),
    };
    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LineRejection::InvalidTimezone);
    }
    let value: i64 = digits.parse().map_err(|_| LineRejection::InvalidTimezone)?;
    let (hours, minutes) = (value / 100, value % 100);
    if minutes >= 60 {
        return Err(LineRejection::InvalidTimezone);
    }
    Ok(Duration::minutes(sign * (hours * 60 + minutes)))
}
