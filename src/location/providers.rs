//! Location providers: BigDataCloud, IP-API, and Mozilla Location Service.
//!
//! Each provider performs exactly one request and never retries. Response
//! parsing is kept separate from transport so every shape can be checked
//! without a network.

use super::types::{Location, LocationSource, ProviderError};
use serde::Deserialize;

/// A single upstream geolocation service.
pub trait LocationProvider {
    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Issue one request and normalize the response.
    fn resolve(&self) -> Result<Location, ProviderError>;
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

fn read_body(response: ureq::Response) -> Result<String, ProviderError> {
    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(ProviderError::Status(status));
    }
    response
        .into_string()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

// ─── BigDataCloud ───────────────────────────────────────────────

const BIGDATACLOUD_ACCURACY_M: f64 = 1000.0;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BigDataCloudResult {
    location: Option<BigDataCloudLocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BigDataCloudLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy_radius: Option<f64>,
    city: Option<String>,
    country_name: Option<String>,
}

/// Parse a BigDataCloud client-info response.
pub fn parse_bigdatacloud(body: &str) -> Result<Location, ProviderError> {
    let r: BigDataCloudResult =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let loc = r.location.ok_or(ProviderError::MissingField("location"))?;

    Ok(Location {
        latitude: loc.latitude.ok_or(ProviderError::MissingField("location.latitude"))?,
        longitude: loc.longitude.ok_or(ProviderError::MissingField("location.longitude"))?,
        accuracy: loc.accuracy_radius.unwrap_or(BIGDATACLOUD_ACCURACY_M),
        source: LocationSource::BigDataCloud,
        city: non_empty(loc.city),
        country: non_empty(loc.country_name),
    })
}

/// Best accuracy of the three; tried first.
pub struct BigDataCloud {
    agent: ureq::Agent,
    url: String,
}

impl BigDataCloud {
    pub const URL: &'static str = "https://api.bigdatacloud.net/data/client-info";

    pub fn new(agent: ureq::Agent) -> Self {
        Self::with_url(agent, Self::URL)
    }

    pub fn with_url(agent: ureq::Agent, url: impl Into<String>) -> Self {
        Self { agent, url: url.into() }
    }
}

impl LocationProvider for BigDataCloud {
    fn name(&self) -> &'static str {
        "BigDataCloud"
    }

    fn resolve(&self) -> Result<Location, ProviderError> {
        let response = self.agent.get(&self.url).call()?;
        parse_bigdatacloud(&read_body(response)?)
    }
}

// ─── IP-API ─────────────────────────────────────────────────────

/// IP geolocation is city-level at best.
const IP_API_ACCURACY_M: f64 = 5000.0;

#[derive(Deserialize)]
struct IpApiResult {
    status: Option<String>,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
}

/// Parse an ip-api.com JSON response.
pub fn parse_ip_api(body: &str) -> Result<Location, ProviderError> {
    let r: IpApiResult =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    match r.status.as_deref() {
        Some("success") => {}
        Some(other) => {
            let reason = r.message.unwrap_or_else(|| other.to_string());
            return Err(ProviderError::Unsuccessful(reason));
        }
        None => return Err(ProviderError::MissingField("status")),
    }

    Ok(Location {
        latitude: r.lat.ok_or(ProviderError::MissingField("lat"))?,
        longitude: r.lon.ok_or(ProviderError::MissingField("lon"))?,
        accuracy: IP_API_ACCURACY_M,
        source: LocationSource::IpApi,
        city: non_empty(r.city),
        country: non_empty(r.country),
    })
}

/// IP-based fallback.
pub struct IpApi {
    agent: ureq::Agent,
    url: String,
}

impl IpApi {
    pub const URL: &'static str = "http://ip-api.com/json/";

    pub fn new(agent: ureq::Agent) -> Self {
        Self::with_url(agent, Self::URL)
    }

    pub fn with_url(agent: ureq::Agent, url: impl Into<String>) -> Self {
        Self { agent, url: url.into() }
    }
}

impl LocationProvider for IpApi {
    fn name(&self) -> &'static str {
        "IP-API"
    }

    fn resolve(&self) -> Result<Location, ProviderError> {
        let response = self.agent.get(&self.url).call()?;
        parse_ip_api(&read_body(response)?)
    }
}

// ─── Mozilla Location Service ───────────────────────────────────

const MOZILLA_ACCURACY_M: f64 = 2000.0;

#[derive(Deserialize)]
struct MozillaResult {
    location: Option<MozillaLocation>,
    accuracy: Option<f64>,
}

#[derive(Deserialize)]
struct MozillaLocation {
    lat: Option<f64>,
    lng: Option<f64>,
}

/// Parse a Mozilla geolocate response.
pub fn parse_mozilla(body: &str) -> Result<Location, ProviderError> {
    let r: MozillaResult =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let loc = r.location.ok_or(ProviderError::MissingField("location"))?;

    Ok(Location {
        latitude: loc.lat.ok_or(ProviderError::MissingField("location.lat"))?,
        longitude: loc.lng.ok_or(ProviderError::MissingField("location.lng"))?,
        accuracy: r.accuracy.unwrap_or(MOZILLA_ACCURACY_M),
        source: LocationSource::MozillaMls,
        city: None,
        country: None,
    })
}

/// WiFi/IP hybrid, last resort.
pub struct MozillaMls {
    agent: ureq::Agent,
    url: String,
}

impl MozillaMls {
    pub const URL: &'static str = "https://location.services.mozilla.com/v1/geolocate?key=test";

    pub fn new(agent: ureq::Agent) -> Self {
        Self::with_url(agent, Self::URL)
    }

    pub fn with_url(agent: ureq::Agent, url: impl Into<String>) -> Self {
        Self { agent, url: url.into() }
    }
}

impl LocationProvider for MozillaMls {
    fn name(&self) -> &'static str {
        "Mozilla MLS"
    }

    fn resolve(&self) -> Result<Location, ProviderError> {
        let response = self
            .agent
            .post(&self.url)
            .send_json(serde_json::json!({ "considerIp": true }))?;
        parse_mozilla(&read_body(response)?)
    }
}
