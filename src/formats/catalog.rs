use std::sync::Arc;

use super::regex::{
    COMMON_LOG_FORMAT, HOST_PREFIX, ICECAST2_SUFFIX, NCSA_EXTENDED_SUFFIX, S3_LOG_FORMAT,
};
use super::{JsonFormat, LogFormat, RegexFormat, W3cFlavor, W3cFormat, W3cOptions};
use crate::error::ImportError;

/// Built-in formats, in the order detection tries them
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    entries: Vec<LogFormat>,
}

impl FormatCatalog {
    pub fn builtin(w3c_options: &W3cOptions) -> Result<Self, ImportError> {
        let w3c_options = Arc::new(w3c_options.clone());
        let common_complete = format!("{}{}{}", HOST_PREFIX, COMMON_LOG_FORMAT, NCSA_EXTENDED_SUFFIX);
        let regex = |name: &str, pattern: &str| RegexFormat::new(name, pattern).map(LogFormat::Regex);
        let w3c = |flavor| LogFormat::W3c(W3cFormat::new(flavor, Arc::clone(&w3c_options)));

        let entries = vec![
            regex("common", COMMON_LOG_FORMAT)?,
            regex("common_vhost", &format!("{}{}", HOST_PREFIX, COMMON_LOG_FORMAT))?,
            regex(
                "ncsa_extended",
                &format!("{}{}", COMMON_LOG_FORMAT, NCSA_EXTENDED_SUFFIX),
            )?,
            regex("common_complete", &common_complete)?,
            w3c(W3cFlavor::Extended),
            w3c(W3cFlavor::CloudFront),
            w3c(W3cFlavor::Iis),
            regex("s3", S3_LOG_FORMAT)?,
            regex(
                "icecast2",
                &format!("{}{}{}", COMMON_LOG_FORMAT, NCSA_EXTENDED_SUFFIX, ICECAST2_SUFFIX),
            )?,
            LogFormat::Json(JsonFormat::new("nginx_json")),
        ];

        Ok(Self { entries })
    }

    /// A single user-supplied regex format (`--log-format-regex`)
    pub fn custom(pattern: &str) -> Result<LogFormat, ImportError> {
        RegexFormat::new("custom", pattern).map(LogFormat::Regex)
    }

    pub fn by_name(&self, name: &str) -> Option<&LogFormat> {
        self.entries.iter().find(|f| f.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(LogFormat::name).collect()
    }

    pub fn entries(&self) -> &[LogFormat] {
        &self.entries
    }
}
