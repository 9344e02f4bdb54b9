use crate::cache::Clock;
use crate::ebay::config::{APP_SCOPE, EbayConfig};
use crate::error::AuthError;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Share of the advertised lifetime after which a credential is renewed.
const REFRESH_AT_LIFETIME_FRACTION: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub obtained_at_ms: i64,
    pub expires_in_secs: u64,
}

impl Credential {
    pub fn refresh_due_at_ms(&self) -> i64 {
        let usable = self.expires_in_secs as f64 * 1000.0 * REFRESH_AT_LIFETIME_FRACTION;
        self.obtained_at_ms + usable as i64
    }

    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        now_ms >= self.refresh_due_at_ms()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Application-token cache for the client-credentials grant. The lock is
/// held across the exchange so concurrent callers share one refresh.
pub struct AppTokenCache {
    http: Client,
    config: Arc<EbayConfig>,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<Credential>>,
}

impl AppTokenCache {
    pub fn new(http: Client, config: Arc<EbayConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            config,
            clock,
            cached: Mutex::new(None),
        }
    }

    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        let mut guard = self.cached.lock().await;
        let now = self.clock.now_ms();
        if let Some(existing) = guard.as_ref()
            && !existing.needs_refresh(now)
        {
            return Ok(existing.clone());
        }
        let fresh = self.request_token(now).await?;
        info!(
            target = "motorval.ebay",
            expires_in = fresh.expires_in_secs,
            "obtained application token"
        );
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops the cached credential, e.g. after the API rejected it.
    pub async fn forget(&self) {
        debug!(target = "motorval.ebay", "dropping cached application token");
        *self.cached.lock().await = None;
    }

    async fn request_token(&self, now_ms: i64) -> Result<Credential, AuthError> {
        let header = basic_auth_header(&self.config)?;
        let params = [("grant_type", "client_credentials"), ("scope", APP_SCOPE)];
        let response = self
            .http
            .post(self.config.oauth_token_url())
            .header(reqwest::header::AUTHORIZATION, header)
            .form(&params)
            .send()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected {
                status: response.status().as_u16(),
            });
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| AuthError::Request(err.to_string()))?;
        Ok(Credential {
            access_token: payload.access_token,
            obtained_at_ms: now_ms,
            expires_in_secs: payload.expires_in.unwrap_or(7200),
        })
    }
}

fn basic_auth_header(config: &EbayConfig) -> Result<String, AuthError> {
    if !config.has_credentials() {
        return Err(AuthError::MissingCredentials);
    }
    let raw = format!("{}:{}", config.app_id, config.app_secret);
    Ok(format!("Basic {}", BASE64.encode(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_window_is_ninety_percent_of_lifetime() {
        let credential = Credential {
            access_token: "t".into(),
            obtained_at_ms: 0,
            expires_in_secs: 7200,
        };
        assert_eq!(credential.refresh_due_at_ms(), 6_480_000);
        assert!(!credential.needs_refresh(6_479_999));
        assert!(credential.needs_refresh(6_480_000));
    }

    #[test]
    fn basic_header_requires_credentials() {
        let cfg = EbayConfig::with_root("http://localhost");
        assert_eq!(
            basic_auth_header(&cfg).unwrap_err(),
            AuthError::MissingCredentials
        );
        let cfg = cfg.with_credentials("app", "secret");
        assert_eq!(basic_auth_header(&cfg).unwrap(), "Basic YXBwOnNlY3JldA==");
    }
}
