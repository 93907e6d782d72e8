//! Core types for the location subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which upstream service produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationSource {
    #[serde(rename = "bigdatacloud")]
    BigDataCloud,
    #[serde(rename = "ip-api")]
    IpApi,
    #[serde(rename = "mozilla-mls")]
    MozillaMls,
}

impl LocationSource {
    /// Wire name, as sent to the remote node.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BigDataCloud => "bigdatacloud",
            Self::IpApi => "ip-api",
            Self::MozillaMls => "mozilla-mls",
        }
    }
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BigDataCloud => write!(f, "BigDataCloud"),
            Self::IpApi => write!(f, "IP-API"),
            Self::MozillaMls => write!(f, "Mozilla MLS"),
        }
    }
}

/// A normalized location reading.
///
/// Only providers construct these, and only once every required field
/// has been found in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in metres.
    pub accuracy: f64,
    pub source: LocationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Location {
    /// One-line summary used in the cycle log.
    pub fn display_line(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }

    /// "City, Country" when the provider reported a city.
    pub fn place(&self) -> Option<String> {
        let city = self.city.as_deref()?;
        Some(match self.country.as_deref() {
            Some(country) => format!("{}, {}", city, country),
            None => city.to_string(),
        })
    }
}

/// Why a single provider could not produce a reading.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connection failed: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid JSON: {0}")]
    Malformed(String),
    #[error("no `{0}` in response")]
    MissingField(&'static str),
    #[error("provider reported failure: {0}")]
    Unsuccessful(String),
}

impl From<ureq::Error> for ProviderError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::Status(code),
            ureq::Error::Transport(t) => Self::Transport(t.to_string()),
        }
    }
}
