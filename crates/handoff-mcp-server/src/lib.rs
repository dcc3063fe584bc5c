//! Tool host for handoff.
//!
//! Serves MCP over HTTP. Inbound requests are authenticated at the session level
//! ([`auth`]); tools that declare a resource run only after the [`grant`] guard
//! exchanged the session for a credential scoped to that resource, and every
//! `tools/call` leaves one audit record ([`handler`]).

pub mod auth;
pub mod grant;
pub mod handler;
pub mod logging;
pub mod server;
pub mod tools;

pub use server::{router, routes, serve, AppState, ServerError};
