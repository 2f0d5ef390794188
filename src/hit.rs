use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Replay-tracking parameters that identify a visitor, in preference order
pub const VISITOR_ID_PARAMS: [&str; 4] = ["uid", "cid", "_id", "cip"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitEvent {
    pub category: String,
    pub action: String,
    pub name: Option<String>,
}

/// Visitor location carried in front of the user agent by streaming
/// servers, as `country_code:country:city:lat:long[:region:region_name][:org]:agent`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HitLocation {
    pub country_code: String,
    pub country: String,
    pub city: String,
    pub latitude: String,
    pub longitude: String,
    pub region: String,
    pub region_name: String,
    pub organization: String,
}

impl HitLocation {
    /// Split a location-prefixed user agent; `None` when the part count
    /// is not one of the known layouts (6, 7 or 9 parts)
    pub fn split_user_agent(user_agent: &str) -> Option<(HitLocation, &str)> {
        let parts: Vec<&str> = user_agent.split(':').collect();
        let mut location = HitLocation {
            country_code: parts[0].to_string(),
            country: parts.get(1)?.to_string(),
            city: parts.get(2)?.to_string(),
            latitude: parts.get(3)?.to_string(),
            longitude: parts.get(4)?.to_string(),
            ..Default::default()
        };
        match parts.len() {
            6 => {}
            7 => location.organization = parts[5].to_string(),
            9 => {
                location.region = parts[5].to_string();
                location.region_name = parts[6].to_string();
                location.organization = parts[7].to_string();
            }
            _ => return None,
        }
        Some((location, parts[parts.len() - 1]))
    }
}

/// Custom variables of one scope.
///
/// Variables are numbered slots until a replayed request supplies the whole
/// scope as an encoded string; from then on the scope is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomVars {
    Slots(Vec<(String, String)>),
    Raw(String),
}

impl Default for CustomVars {
    fn default() -> Self {
        CustomVars::Slots(Vec::new())
    }
}

impl CustomVars {
    /// Add a variable; returns false when the scope is opaque
    pub fn add(&mut self, key: &str, value: &str) -> bool {
        match self {
            CustomVars::Slots(slots) => {
                slots.push((key.to_string(), value.to_string()));
                true
            }
            CustomVars::Raw(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CustomVars::Slots(slots) => slots.is_empty(),
            CustomVars::Raw(raw) => raw.is_empty(),
        }
    }

    /// Tracking API encoding: `{"1": [name, value], ...}` or the raw string
    pub fn to_param(&self) -> String {
        match self {
            CustomVars::Slots(slots) => {
                let object: serde_json::Map<String, Value> = slots
                    .iter()
                    .enumerate()
                    .map(|(i, (k, v))| ((i + 1).to_string(), json!([k, v])))
                    .collect();
                Value::Object(object).to_string()
            }
            CustomVars::Raw(raw) => raw.clone(),
        }
    }
}

/// One access event, extracted from one log line
#[derive(Debug, Clone, Default)]
pub struct Hit {
    pub filename: String,
    /// 0-based physical line number in `filename`
    pub lineno: usize,

    pub ip: String,
    pub host: Option<String>,
    pub path: String,
    pub full_path: String,
    pub query_string: String,
    pub extension: String,
    pub referrer: String,
    pub user_agent: String,
    pub status: String,
    pub length: u64,
    pub generation_time_milli: f64,
    pub userid: Option<String>,
    pub event: Option<HitEvent>,
    pub session_time: Option<i64>,
    /// UTC start of the listening session, `date - session_time`
    pub session_start: Option<NaiveDateTime>,
    pub location: Option<HitLocation>,

    /// UTC, set once the hit has passed the filter chain
    pub date: NaiveDateTime,

    pub is_download: bool,
    pub is_static: bool,
    pub is_robot: bool,
    pub is_error: bool,
    pub is_redirect: bool,

    pub site_id: Option<u32>,
    /// Extra tracking parameters (`uid`, replayed query arguments)
    pub args: IndexMap<String, String>,
    pub page_cvars: CustomVars,
    pub visit_cvars: CustomVars,
}

impl Hit {
    pub fn add_page_custom_var(&mut self, key: &str, value: &str) {
        if !self.page_cvars.add(key, value) {
            tracing::debug!(key, value, "ignoring page custom variable, scope already set to a string");
        }
    }

    pub fn add_visit_custom_var(&mut self, key: &str, value: &str) {
        if !self.visit_cvars.add(key, value) {
            tracing::debug!(key, value, "ignoring visit custom variable, scope already set to a string");
        }
    }

    /// Key that routes this hit to a recorder; hits of one visitor share it
    pub fn visitor_key(&self, replay_tracking: bool) -> &str {
        if replay_tracking {
            if let Some(id) = VISITOR_ID_PARAMS
                .iter()
                .find_map(|param| self.args.get(*param))
            {
                return id;
            }
        }
        &self.ip
    }

    pub fn is_status_class(&self, class: u8) -> bool {
        self.status.as_bytes().first() == Some(&class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_vars_encoding() {
        let mut hit = Hit::default();
        hit.add_page_custom_var("Status", "ok");
        hit.add_page_custom_var("User", "alice");
        assert_eq!(
            hit.page_cvars.to_param(),
            r#"{"1":["Status","ok"],"2":["User","alice"]}"#
        );
        assert!(hit.visit_cvars.is_empty());
    }

    #[test]
    fn test_adding_to_raw_scope_is_noop() {
        let mut hit = Hit {
            visit_cvars: CustomVars::Raw(r#"{"1":["a","b"]}"#.to_string()),
            ..Default::default()
        };
        hit.add_visit_custom_var("User", "alice");
        assert_eq!(
            hit.visit_cvars,
            CustomVars::Raw(r#"{"1":["a","b"]}"#.to_string())
        );
    }

    #[test]
    fn test_location_layouts() {
        let (location, agent) =
            HitLocation::split_user_agent("FR:France:Paris:48.85:2.35:VLC/3.0").unwrap();
        assert_eq!(location.country_code, "FR");
        assert_eq!(location.longitude, "2.35");
        assert_eq!(location.organization, "");
        assert_eq!(agent, "VLC/3.0");

        let (location, agent) =
            HitLocation::split_user_agent("FR:France:Paris:48.85:2.35:Orange:VLC/3.0").unwrap();
        assert_eq!(location.organization, "Orange");
        assert_eq!(agent, "VLC/3.0");

        let (location, agent) = HitLocation::split_user_agent(
            "FR:France:Paris:48.85:2.35:IDF:Ile-de-France:Orange:VLC/3.0",
        )
        .unwrap();
        assert_eq!(location.region, "IDF");
        assert_eq!(location.region_name, "Ile-de-France");
        assert_eq!(location.organization, "Orange");
        assert_eq!(agent, "VLC/3.0");

        assert_eq!(HitLocation::split_user_agent("VLC/3.0"), None);
        assert_eq!(HitLocation::split_user_agent("a:b:c:d:e:f:g:h"), None);
    }

    #[test]
    fn test_visitor_key_preference() {
        let mut hit = Hit {
            ip: "1.2.3.4".to_string(),
            ..Default::default()
        };
        assert_eq!(hit.visitor_key(true), "1.2.3.4");

        hit.args.insert("cip".to_string(), "5.6.7.8".to_string());
        hit.args.insert("cid".to_string(), "abcdef".to_string());
        assert_eq!(hit.visitor_key(true), "abcdef");
        assert_eq!(hit.visitor_key(false), "1.2.3.4");

        hit.args.insert("uid".to_string(), "alice".to_string());
        assert_eq!(hit.visitor_key(true), "alice");
    }
}
