//! Location subsystem for the Trackium agent.
//!
//! Provides the three upstream geolocation providers and the resolver that
//! walks them in priority order.

pub mod providers;
pub mod resolver;
pub mod types;

pub use providers::{BigDataCloud, IpApi, LocationProvider, MozillaMls};
pub use resolver::{BoxedProvider, LocationResolver};
pub use types::{Location, LocationSource, ProviderError};
