// HTTP surface: OAuth connect/callback, connections, rules
pub mod api;

// Bearer token handling
pub mod auth;

// TOML + environment configuration
pub mod config;

// Encrypted credential records
pub mod credentials;

pub mod error;

// Direct-API pots and transfers
pub mod monzo;

// Token exchange and lifecycle
pub mod oauth;

// Daily reconciliation job
pub mod reconcile;

// Automation rules
pub mod rules;

// Aggregator reads
pub mod truelayer;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
