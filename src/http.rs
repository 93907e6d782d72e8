//! Shared HTTP agent construction.

use std::time::Duration;

pub const USER_AGENT: &str = concat!("Trackium/", env!("CARGO_PKG_VERSION"), " (location-agent)");

/// Default per-request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the agent every provider and delivery strategy shares.
///
/// The timeout covers the whole request, connect through body read.
pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}
