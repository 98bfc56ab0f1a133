// src/fetch/urls.rs
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use url::Url;

const SLOT: &str = "{}";
const UPS_ZONE_CSV: &str = "https://www.ups.com/media/us/currentrates/zone-csv/{}.xls";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("endpoint template {0:?} must contain exactly one {{}} slot")]
    Slots(String),
    #[error("endpoint template {template:?} does not render to a URL: {reason}")]
    InvalidUrl { template: String, reason: String },
}

/// Download URL with a single `{}` slot for the three-digit prefix,
/// e.g. `https://www.ups.com/media/us/currentrates/zone-csv/{}.xls`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct EndpointTemplate(String);

impl EndpointTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.matches(SLOT).count() != 1 {
            return Err(TemplateError::Slots(template.to_string()));
        }
        Url::parse(&template.replace(SLOT, "000")).map_err(|e| TemplateError::InvalidUrl {
            template: template.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(template.to_string()))
    }

    pub fn render(&self, prefix: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.0.replacen(SLOT, prefix, 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EndpointTemplate {
    fn default() -> Self {
        Self(UPS_ZONE_CSV.to_string())
    }
}

impl TryFrom<String> for EndpointTemplate {
    type Error = TemplateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl fmt::Display for EndpointTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
