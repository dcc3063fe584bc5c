//! Per-call credential grant.
//!
//! Runs before any tool that declares a resource. Each call performs its own
//! exchange: there is no cache, so concurrent calls under the same session never
//! share a credential.

use crate::auth::SessionIdentity;
use handoff_core::audit::reason_codes;
use handoff_core::{AccessContext, BrokerError, Resource, TokenExchanger};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("no authenticated session; log in before calling a tool that needs {resource}")]
    NoSession { resource: Resource },

    #[error("authorization for {resource} failed: {source}")]
    Exchange {
        resource: Resource,
        #[source]
        source: BrokerError,
    },
}

impl GrantError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NoSession { .. } => reason_codes::A_NO_SESSION,
            Self::Exchange { source, .. } => source.reason_code(),
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            Self::NoSession { resource } | Self::Exchange { resource, .. } => resource,
        }
    }
}

#[derive(Clone)]
pub struct GrantGuard {
    broker: Arc<dyn TokenExchanger>,
}

impl GrantGuard {
    pub fn new(broker: Arc<dyn TokenExchanger>) -> Self {
        Self { broker }
    }

    /// Exchange the session for one credential per resource. Fails on the first
    /// refusal; no attempt is retried.
    pub async fn acquire(
        &self,
        session: Option<&SessionIdentity>,
        resources: &[Resource],
    ) -> Result<AccessContext, GrantError> {
        let mut ctx = AccessContext::new();
        if resources.is_empty() {
            return Ok(ctx);
        }

        let Some(session) = session else {
            return Err(GrantError::NoSession {
                resource: resources[0].clone(),
            });
        };

        for resource in resources {
            let credential = self
                .broker
                .exchange(&session.token, resource)
                .await
                .map_err(|source| GrantError::Exchange {
                    resource: resource.clone(),
                    source,
                })?;
            if credential.is_expired() {
                return Err(GrantError::Exchange {
                    resource: resource.clone(),
                    source: BrokerError::InvalidResponse {
                        message: "issued credential is already expired".to_string(),
                    },
                });
            }
            ctx.insert(credential);
        }
        Ok(ctx)
    }
}
