//! Location resolver — orchestrates the provider fallback chain.
//!
//! Flow:  BigDataCloud → IP-API → Mozilla MLS → no location
//!
//! Providers are tried one after another, never raced; the first success
//! wins by construction.

use super::providers::{BigDataCloud, IpApi, LocationProvider, MozillaMls};
use super::types::Location;

pub type BoxedProvider = Box<dyn LocationProvider + Send + Sync>;

/// The resolver with its ordered provider chain.
pub struct LocationResolver {
    providers: Vec<BoxedProvider>,
}

impl LocationResolver {
    /// Build a resolver over providers in priority order.
    pub fn new(providers: Vec<BoxedProvider>) -> Self {
        Self { providers }
    }

    /// The production chain: BigDataCloud, then IP-API, then Mozilla MLS.
    pub fn standard(agent: ureq::Agent) -> Self {
        Self::new(vec![
            Box::new(BigDataCloud::new(agent.clone())),
            Box::new(IpApi::new(agent.clone())),
            Box::new(MozillaMls::new(agent)),
        ])
    }

    /// Names of the providers in the order they will be tried.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Try each provider in order and return the first reading.
    ///
    /// `None` means every provider failed this cycle; that is an expected
    /// outcome, not an error.
    pub fn resolve(&self) -> Option<Location> {
        tracing::info!("detecting location");

        for provider in &self.providers {
            match provider.resolve() {
                Ok(loc) => {
                    tracing::info!(provider = provider.name(), "location detected");
                    return Some(loc);
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "provider failed");
                }
            }
        }

        tracing::warn!("all location providers failed");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::types::{LocationSource, ProviderError};
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider stub returning a canned outcome and counting calls.
    struct Stub {
        outcome: Option<Location>,
        calls: Arc<AtomicUsize>,
    }

    impl LocationProvider for Stub {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn resolve(&self) -> Result<Location, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
                .clone()
                .ok_or_else(|| ProviderError::Transport("timed out".into()))
        }
    }

    fn reading(source: LocationSource, lat: f64) -> Location {
        Location {
            latitude: lat,
            longitude: 0.0,
            accuracy: 1000.0,
            source,
            city: None,
            country: None,
        }
    }

    fn chain(outcomes: Vec<Option<Location>>) -> (LocationResolver, Vec<Arc<AtomicUsize>>) {
        let mut counters = Vec::new();
        let mut providers: Vec<BoxedProvider> = Vec::new();
        for outcome in outcomes {
            let calls = Arc::new(AtomicUsize::new(0));
            counters.push(calls.clone());
            providers.push(Box::new(Stub { outcome, calls }));
        }
        (LocationResolver::new(providers), counters)
    }

    #[test]
    fn test_first_provider_wins() {
        let (resolver, calls) = chain(vec![
            Some(reading(LocationSource::BigDataCloud, 1.0)),
            Some(reading(LocationSource::IpApi, 2.0)),
            Some(reading(LocationSource::MozillaMls, 3.0)),
        ]);
        let loc = resolver.resolve().unwrap();
        assert_eq!(loc.source, LocationSource::BigDataCloud);
        assert_eq!(calls[0].load(Ordering::SeqCst), 1);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_a_wins_even_when_others_fail() {
        let (resolver, _) = chain(vec![Some(reading(LocationSource::BigDataCloud, 1.0)), None, None]);
        assert_eq!(resolver.resolve().unwrap().source, LocationSource::BigDataCloud);
    }

    #[test]
    fn test_falls_through_to_second() {
        let (resolver, calls) = chain(vec![
            None,
            Some(reading(LocationSource::IpApi, 40.7)),
            Some(reading(LocationSource::MozillaMls, 3.0)),
        ]);
        let loc = resolver.resolve().unwrap();
        assert_eq!(loc.source, LocationSource::IpApi);
        assert_abs_diff_eq!(loc.latitude, 40.7);
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_last_resort() {
        let (resolver, calls) = chain(vec![None, None, Some(reading(LocationSource::MozillaMls, 3.0))]);
        assert_eq!(resolver.resolve().unwrap().source, LocationSource::MozillaMls);
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_all_fail() {
        let (resolver, calls) = chain(vec![None, None, None]);
        assert!(resolver.resolve().is_none());
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_standard_order() {
        let resolver = LocationResolver::standard(crate::http::agent(crate::http::DEFAULT_TIMEOUT));
        assert_eq!(resolver.provider_names(), vec!["BigDataCloud", "IP-API", "Mozilla MLS"]);
    }
}
