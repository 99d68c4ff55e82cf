use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use crate::app::AppConfig;

const PASSWORD_SIGN_IN: &str =
    "https://identitytoolkit.googleapis.com/v1/accounts:signInWithPassword";

/// Who is signed in, as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub display_name: String,
    pub photo_url: Option<String>,
    pub uid: String,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub identity: Identity,
    /// Bearer token for the database, when the provider issues one.
    pub token: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("sign-in rejected: {0}")]
    Rejected(String),
    #[error("auth transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("auth response missing {0}")]
    MissingField(&'static str),
    #[error("no account configured; set email and password")]
    NoAccount,
}

/// Hosted authentication, consumed as a black box.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self) -> Result<Credentials, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Auth-state notifications: `Some` while signed in.
    fn state(&self) -> watch::Receiver<Option<Identity>>;
}

/// Email/password sign-in against the hosted identity endpoint.
pub struct PasswordAuth {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    email: String,
    password: String,
    state: watch::Sender<Option<Identity>>,
}

impl PasswordAuth {
    pub fn new(api_key: &str, email: &str, password: &str) -> Result<Self, AuthError> {
        let (state, _) = watch::channel(None);
        Ok(Self {
            http: HttpClient::builder().timeout(Duration::from_secs(15)).build()?,
            endpoint: PASSWORD_SIGN_IN.to_string(),
            api_key: api_key.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            state,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AuthError> {
        let auth = Self::new(&config.api_key, &config.email, &config.password)?;
        Ok(match &config.auth_endpoint {
            Some(endpoint) => auth.with_endpoint(endpoint),
            None => auth,
        })
    }

    /// Points sign-in at another deployment, e.g. a local emulator.
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

/// Reads an identity out of the sign-in response, tolerating the field
/// spellings different deployments use.
fn identity_from_response(json: &Value, email: &str) -> Result<(Identity, String), AuthError> {
    let uid = json
        .get("localId")
        .or_else(|| json.get("uid"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingField("localId"))?;
    let token = json
        .get("idToken")
        .and_then(|v| v.as_str())
        .ok_or(AuthError::MissingField("idToken"))?;
    let display_name = json
        .get("displayName")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string());
    let photo_url = json
        .get("profilePicture")
        .or_else(|| json.get("photoUrl"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok((
        Identity {
            display_name,
            photo_url,
            uid: uid.to_string(),
        },
        token.to_string(),
    ))
}

#[async_trait]
impl AuthProvider for PasswordAuth {
    async fn sign_in(&self) -> Result<Credentials, AuthError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(AuthError::NoAccount);
        }
        let body = serde_json::json!({
            "email": self.email,
            "password": self.password,
            "returnSecureToken": true,
        });
        let resp = self
            .http
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let json: Value = resp.json().await?;
        if !status.is_success() {
            let message = json
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!("[auth] sign-in failed: {message}");
            return Err(AuthError::Rejected(message));
        }
        let (identity, token) = identity_from_response(&json, &self.email)?;
        info!("[auth] signed in as {}", identity.display_name);
        self.state.send_replace(Some(identity.clone()));
        Ok(Credentials {
            identity,
            token: Some(token),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.send_replace(None);
        Ok(())
    }

    fn state(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

/// Fixed identity with no token; used with the in-process store.
pub struct StaticAuth {
    identity: Identity,
    state: watch::Sender<Option<Identity>>,
}

impl StaticAuth {
    pub fn new(identity: Identity) -> Self {
        let (state, _) = watch::channel(None);
        Self { identity, state }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn sign_in(&self) -> Result<Credentials, AuthError> {
        self.state.send_replace(Some(self.identity.clone()));
        Ok(Credentials {
            identity: self.identity.clone(),
            token: None,
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.state.send_replace(None);
        Ok(())
    }

    fn state(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_falls_back_to_email_name() {
        let json = json!({"localId": "u1", "idToken": "tok", "displayName": ""});
        let (identity, token) = identity_from_response(&json, "ada@example.com").unwrap();
        assert_eq!(identity.display_name, "ada");
        assert_eq!(identity.uid, "u1");
        assert_eq!(identity.photo_url, None);
        assert_eq!(token, "tok");
    }

    #[test]
    fn missing_uid_is_an_error() {
        let json = json!({"idToken": "tok"});
        assert!(matches!(
            identity_from_response(&json, "a@b.c"),
            Err(AuthError::MissingField("localId"))
        ));
    }

    #[tokio::test]
    async fn static_auth_reports_state_changes() {
        let auth = StaticAuth::new(Identity {
            display_name: "Ada".into(),
            photo_url: None,
            uid: "u1".into(),
        });
        let mut state = auth.state();
        assert!(state.borrow().is_none());

        auth.sign_in().await.unwrap();
        state.changed().await.unwrap();
        assert_eq!(state.borrow().as_ref().map(|i| i.uid.as_str()), Some("u1"));

        auth.sign_out().await.unwrap();
        state.changed().await.unwrap();
        assert!(state.borrow().is_none());
    }

    #[tokio::test]
    async fn password_auth_needs_an_account() {
        let auth = PasswordAuth::new("key", "", "").unwrap();
        assert!(matches!(auth.sign_in().await, Err(AuthError::NoAccount)));
    }

    #[test]
    fn endpoint_override_comes_from_config() {
        let mut config = AppConfig::new();
        config.api_key = "key".into();
        config.auth_endpoint = Some("http://localhost:9099/signIn".into());
        let auth = PasswordAuth::from_config(&config).unwrap();
        assert_eq!(auth.endpoint, "http://localhost:9099/signIn");
        assert_eq!(auth.api_key, "key");
    }
}
