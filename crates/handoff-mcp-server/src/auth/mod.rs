//! Session-level authentication of inbound MCP requests.

pub mod config;
pub mod jwks;
pub mod validation;

pub use config::{AuthConfig, SessionAuth};
pub use jwks::JwksProvider;
pub use validation::{AuthError, Claims, SessionIdentity, TokenValidator};
