//! OAuth 2.0 grants for the two providers.
//!
//! - [`provider`]: endpoints and client credentials per provider
//! - [`exchange`]: authorization-code and refresh-token exchanges
//! - [`lifecycle`]: the per-credential refresh protocol ([`TokenManager`])

pub mod exchange;
pub mod lifecycle;
pub mod provider;

pub use exchange::TokenGrant;
pub use lifecycle::{CredentialState, TokenManager};
pub use provider::{ProviderConfig, ProviderRegistry};
