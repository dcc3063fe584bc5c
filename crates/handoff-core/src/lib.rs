//! Core building blocks for handoff: the broker client that mints per-call
//! delegated credentials, the audit trail that records every tool call, and the
//! Resource API client the tools call with those credentials.

pub mod audit;
pub mod broker;
pub mod config;
pub mod credential;
pub mod endpoint;
pub mod github;
pub mod headers;
pub mod jsonrpc;

pub use broker::{BrokerError, KeycardBroker, TokenExchanger};
pub use config::{ConfigReport, RawEnv, Settings};
pub use credential::{AccessContext, DelegatedCredential, Resource, SessionToken};
