//! Trackium location agent.
//!
//! Resolves an approximate device location through a fixed chain of
//! geolocation providers, keeps the last reading on disk, and relays it to
//! a Minima node. Readings the node has not acknowledged stay in a local
//! pending queue until a later cycle delivers them.

pub mod config;
pub mod delivery;
pub mod http;
pub mod location;
pub mod service;
pub mod store;
