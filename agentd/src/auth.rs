//! Credential refresh against the OAuth provider
//!
//! When the model provider reports an authorization failure, the controller
//! asks a `CredentialRefresher` to re-verify the user's bearer with the
//! OAuth provider and re-store whatever comes back. The retry only proceeds
//! if the stored token actually changed; an unchanged token means the
//! original failure was real.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use ractor::ActorRef;
use serde::Deserialize;

use crate::actors::credentials::{self, CredentialStoreMsg};
use crate::actors::state_store::StateStoreMsg;
use shared_types::UserProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Whether the stored token differs from the one that just failed.
    pub changed: bool,
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum AuthError {
    #[error("No credential stored for user")]
    MissingCredential,

    #[error("Credential verification failed: {0}")]
    Verification(String),

    #[error("Credential store error: {0}")]
    Store(String),
}

#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Re-verify the user's credential upstream, re-storing it (and the
    /// profile) if the provider hands back fresh values.
    async fn refresh(&self, user_id: &str) -> Result<RefreshOutcome, AuthError>;
}

// ============================================================================
// OAuth-backed refresher
// ============================================================================

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    id: String,
    email: String,
    credits: f64,
    payment_method: String,
    /// Present when the provider rotated the token during verification.
    #[serde(default)]
    api_key: Option<String>,
}

pub struct OAuthRefresher {
    http: reqwest::Client,
    base_url: String,
    credential_store: ActorRef<CredentialStoreMsg>,
    state_store: ActorRef<StateStoreMsg>,
}

impl OAuthRefresher {
    pub fn new(
        base_url: impl Into<String>,
        credential_store: ActorRef<CredentialStoreMsg>,
        state_store: ActorRef<StateStoreMsg>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credential_store,
            state_store,
        }
    }
}

#[async_trait]
impl CredentialRefresher for OAuthRefresher {
    async fn refresh(&self, user_id: &str) -> Result<RefreshOutcome, AuthError> {
        let current = credentials::get_credential(&self.credential_store, user_id)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?
            .map_err(|e| AuthError::Store(e.to_string()))?;
        let Some(current) = current else {
            return Err(AuthError::MissingCredential);
        };

        let verify_url = format!("{}/oauth/verify", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&verify_url)
            .bearer_auth(&current)
            .send()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        if !response.status().is_success() {
            // A rejected verification does not rotate anything; the caller
            // will see changed=false and propagate the original failure.
            tracing::warn!(
                user_id = %user_id,
                status = %response.status(),
                "Credential verification rejected"
            );
            return Ok(RefreshOutcome { changed: false });
        }

        let verified: VerifyResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Verification(e.to_string()))?;

        let profile = UserProfile {
            id: verified.id,
            email: verified.email,
            credits: verified.credits,
            payment_method: verified.payment_method,
        };
        match ractor::call!(&self.state_store, |reply| StateStoreMsg::SaveProfile {
            profile,
            reply,
        }) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to re-store profile after verification");
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to reach state store after verification");
            }
        }

        if let Some(fresh) = verified.api_key.as_deref() {
            if fresh != current {
                credentials::put_credential(&self.credential_store, user_id, fresh)
                    .await
                    .map_err(|e| AuthError::Store(e.to_string()))?
                    .map_err(|e| AuthError::Store(e.to_string()))?;
            }
        }

        // Re-read rather than trust our own write: a concurrent sign-in may
        // have rotated the token while verification was in flight.
        let stored = credentials::get_credential(&self.credential_store, user_id)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?
            .map_err(|e| AuthError::Store(e.to_string()))?;

        let changed = stored.as_deref() != Some(current.as_str());
        if changed {
            tracing::info!(user_id = %user_id, "Credential refreshed to a new token");
        }
        Ok(RefreshOutcome { changed })
    }
}

// ============================================================================
// Scripted refresher (tests)
// ============================================================================

/// One scripted refresh step: optionally rotate the stored token, then
/// report the outcome.
pub struct RefreshStep {
    pub rotate_to: Option<String>,
    pub result: Result<RefreshOutcome, AuthError>,
}

/// Deterministic refresher used by controller tests.
pub struct ScriptedRefresher {
    credential_store: ActorRef<CredentialStoreMsg>,
    user_id: String,
    steps: Mutex<VecDeque<RefreshStep>>,
    calls: Mutex<usize>,
}

impl ScriptedRefresher {
    pub fn new(
        credential_store: ActorRef<CredentialStoreMsg>,
        user_id: impl Into<String>,
        steps: Vec<RefreshStep>,
    ) -> Self {
        Self {
            credential_store,
            user_id: user_id.into(),
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("refresher lock poisoned")
    }
}

#[async_trait]
impl CredentialRefresher for ScriptedRefresher {
    async fn refresh(&self, _user_id: &str) -> Result<RefreshOutcome, AuthError> {
        *self.calls.lock().expect("refresher lock poisoned") += 1;
        let step = self
            .steps
            .lock()
            .expect("refresher lock poisoned")
            .pop_front()
            .unwrap_or(RefreshStep {
                rotate_to: None,
                result: Ok(RefreshOutcome { changed: false }),
            });

        if let Some(token) = step.rotate_to {
            credentials::put_credential(&self.credential_store, self.user_id.clone(), token)
                .await
                .map_err(|e| AuthError::Store(e.to_string()))?
                .map_err(|e| AuthError::Store(e.to_string()))?;
        }
        step.result
    }
}
