//! Destinations for recorded hits
//!
//! Each recorder thread owns one `Sink`. A submission returns how many hits
//! from the front of the slice were accepted; the caller retries the rest.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};

use crate::error::{ImportError, SubmitError};
use crate::hit::Hit;

const TRACKER_ENDPOINT: &str = "piwik.php";
const CDT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Length of the acknowledged prefix
    pub accepted: usize,
    pub message: Option<String>,
}

impl SubmitOutcome {
    pub fn all(hits: &[Hit]) -> Self {
        Self {
            accepted: hits.len(),
            message: None,
        }
    }
}

pub trait Sink: Send {
    fn submit(&mut self, hits: &[Hit]) -> Result<SubmitOutcome, SubmitError>;
}

/// Accepts everything without sending anything
#[derive(Debug, Default)]
pub struct DryRunSink;

impl Sink for DryRunSink {
    fn submit(&mut self, hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
        for hit in hits {
            tracing::trace!(file = %hit.filename, line = hit.lineno, path = %hit.path, "dry run");
        }
        Ok(SubmitOutcome::all(hits))
    }
}

/// Tracking API parameters for one hit
pub fn tracking_params(hit: &Hit, title_category_delimiter: &str, replay_tracking: bool) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();
    let mut push = |key: &str, value: String| params.push((key.to_string(), value));

    let url = match &hit.host {
        Some(host) => format!("http://{}{}", host, hit.full_path),
        None => hit.full_path.clone(),
    };

    push("rec", "1".to_string());
    push("apiv", "1".to_string());
    if let Some(site_id) = hit.site_id {
        push("idsite", site_id.to_string());
    }
    push("url", url.clone());
    push("urlref", hit.referrer.clone());
    push("cip", hit.ip.clone());
    push("cdt", hit.date.format(CDT_FORMAT).to_string());
    push("ua", hit.user_agent.clone());
    if hit.is_robot {
        push("bots", "1".to_string());
    }
    if let Some(start) = hit.session_start {
        push("_idts", start.and_utc().timestamp().to_string());
    }
    if let Some(location) = &hit.location {
        // Only the fields the tracking API can override; names stay on the hit
        push("country", location.country_code.to_lowercase());
        if !location.region.is_empty() {
            push("region", location.region.clone());
        }
        push("city", location.city.clone());
        push("lat", location.latitude.clone());
        push("long", location.longitude.clone());
    }
    if hit.generation_time_milli > 0.0 {
        push("gt_ms", (hit.generation_time_milli.round() as u64).to_string());
    }
    if hit.is_download {
        push("download", url.clone());
    }
    if hit.is_error || hit.is_redirect {
        let mut title = format!("{}{}URL = {}", hit.status, title_category_delimiter, url);
        if !hit.referrer.is_empty() {
            title.push_str(&format!("{}From = {}", title_category_delimiter, hit.referrer));
        }
        push("action_name", title);
    }
    if let Some(event) = &hit.event {
        push("e_c", event.category.clone());
        push("e_a", event.action.clone());
        if let Some(name) = &event.name {
            push("e_n", name.clone());
        }
    }
    if !hit.page_cvars.is_empty() {
        push("cvar", hit.page_cvars.to_param());
    }
    if !hit.visit_cvars.is_empty() {
        push("_cvar", hit.visit_cvars.to_param());
    }

    // Replayed requests keep their original parameters, overriding the defaults
    for (key, value) in &hit.args {
        if !replay_tracking && key != "uid" {
            continue;
        }
        match params.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.clone(),
            None => params.push((key.clone(), value.clone())),
        }
    }
    params
}

/// `?key=value&...` request string as the bulk API expects it
pub fn tracking_request(hit: &Hit, title_category_delimiter: &str, replay_tracking: bool) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::from("?"));
    for (key, value) in tracking_params(hit, title_category_delimiter, replay_tracking) {
        serializer.append_pair(&key, &value);
    }
    serializer.finish()
}

/// Bulk tracking over HTTP
pub struct HttpTrackerSink {
    client: Client,
    endpoint: String,
    token_auth: Option<String>,
    title_category_delimiter: String,
    replay_tracking: bool,
}

impl HttpTrackerSink {
    pub fn new(
        base_url: &str,
        token_auth: Option<String>,
        timeout: Duration,
        title_category_delimiter: &str,
        replay_tracking: bool,
    ) -> Result<Self, ImportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("loghit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImportError::Config(format!("cannot create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: tracker_endpoint(base_url),
            token_auth,
            title_category_delimiter: title_category_delimiter.to_string(),
            replay_tracking,
        })
    }

    fn payload(&self, hits: &[Hit]) -> Value {
        let requests: Vec<String> = hits
            .iter()
            .map(|hit| tracking_request(hit, &self.title_category_delimiter, self.replay_tracking))
            .collect();
        let mut payload = json!({ "requests": requests });
        if let Some(token) = &self.token_auth {
            payload["token_auth"] = Value::String(token.clone());
        }
        payload
    }
}

fn tracker_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with(TRACKER_ENDPOINT) {
        base.to_string()
    } else {
        format!("{}/{}", base, TRACKER_ENDPOINT)
    }
}

/// Interpret a tracker response body: `tracked` is the acknowledged prefix
pub fn parse_tracker_response(
    status: u16,
    body: &str,
    submitted: usize,
) -> Result<SubmitOutcome, SubmitError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let tracked = parsed
        .as_ref()
        .and_then(|v| v.get("tracked"))
        .and_then(Value::as_u64)
        .map(|n| (n as usize).min(submitted));
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let is_error = parsed
        .as_ref()
        .and_then(|v| v.get("status"))
        .and_then(Value::as_str)
        == Some("error");

    if (200..300).contains(&status) && !is_error {
        return Ok(SubmitOutcome {
            accepted: tracked.unwrap_or(submitted),
            message,
        });
    }
    if status == 401 || status == 403 {
        return Err(SubmitError::Fatal(format!(
            "tracker refused the request (HTTP {}), check --token-auth",
            status
        )));
    }
    match tracked {
        Some(accepted) => Ok(SubmitOutcome {
            accepted,
            message: Some(message.unwrap_or_else(|| format!("HTTP {}", status))),
        }),
        None => {
            tracing::debug!(status, "cannot parse tracker response, should be valid JSON");
            let snippet: String = body.chars().take(200).collect();
            Err(SubmitError::Transient(format!("HTTP {}: {}", status, snippet)))
        }
    }
}

impl Sink for HttpTrackerSink {
    fn submit(&mut self, hits: &[Hit]) -> Result<SubmitOutcome, SubmitError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.payload(hits))
            .send()
            .map_err(|e| SubmitError::Transient(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| SubmitError::Transient(e.to_string()))?;
        parse_tracker_response(status, &body, hits.len())
    }
}
