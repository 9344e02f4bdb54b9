//! eBay Browse/Identity binding: the upstream client behind aspect
//! resolution. One call per `search`; retries are the caller's business.

pub mod auth;
pub mod config;
pub mod search;

pub use auth::{AppTokenCache, Credential};
pub use config::EbayConfig;
pub use search::{AspectDistribution, Constraints, ItemAspect, RawItem, SearchPage};

use crate::cache::Clock;
use crate::error::{AuthError, UpstreamError};
use crate::http::retry_after_secs;
use async_trait::async_trait;
use reqwest::Client;
use search::SearchBody;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const FIELDGROUPS: &str = "MATCHING_ITEMS,ASPECT_REFINEMENTS";

/// Marketplace search seam consumed by the resolver.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(
        &self,
        query: &str,
        constraints: &Constraints,
        page_size: u32,
    ) -> Result<SearchPage, UpstreamError>;

    /// Page size used when the caller has no preference.
    fn default_page_size(&self) -> u32 {
        200
    }
}

pub struct EbayClient {
    http: Client,
    config: Arc<EbayConfig>,
    tokens: AppTokenCache,
}

impl EbayClient {
    pub fn new(http: Client, config: EbayConfig, clock: Arc<dyn Clock>) -> Self {
        let config = Arc::new(config);
        let tokens = AppTokenCache::new(http.clone(), config.clone(), clock);
        Self {
            http,
            config,
            tokens,
        }
    }

    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        self.tokens.authenticate().await
    }
}

#[async_trait]
impl SearchApi for EbayClient {
    async fn search(
        &self,
        query: &str,
        constraints: &Constraints,
        page_size: u32,
    ) -> Result<SearchPage, UpstreamError> {
        let credential = self.tokens.authenticate().await?;
        let started = Instant::now();
        let mut params = vec![
            ("category_ids", self.config.category_id.clone()),
            ("limit", page_size.clamp(1, 200).to_string()),
            ("aspect_filter", constraints.aspect_filter(&self.config.category_id)),
            ("fieldgroups", FIELDGROUPS.to_string()),
        ];
        // category-only searches are allowed when there is no keyword
        if !query.trim().is_empty() {
            params.push(("q", query.trim().to_string()));
        }
        let response = self
            .http
            .get(self.config.search_url())
            .bearer_auth(&credential.access_token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
            .query(&params)
            .send()
            .await?;
        crate::metrics::upstream_call("ebay.search", started.elapsed().as_millis());

        let status = response.status();
        if status.as_u16() == 401 {
            self.tokens.forget().await;
            return Err(AuthError::Rejected { status: 401 }.into());
        }
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), retry_after, body));
        }

        let body: SearchBody = response.json().await?;
        let page = body.into_page()?;
        debug!(
            target = "motorval.ebay",
            query = query,
            total = page.total,
            items = page.items.len(),
            "search completed"
        );
        Ok(page)
    }

    fn default_page_size(&self) -> u32 {
        self.config.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::http::build_client;
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Mock {
        token_calls: Arc<AtomicUsize>,
        queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    async fn token(State(mock): State<Mock>, headers: HeaderMap) -> Response {
        mock.token_calls.fetch_add(1, Ordering::SeqCst);
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !auth.starts_with("Basic ") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!({"access_token": "app-token", "expires_in": 7200})).into_response()
    }

    async fn search(
        State(mock): State<Mock>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        mock.queries.lock().unwrap().push(params.clone());
        if headers.get("authorization").and_then(|v| v.to_str().ok())
            != Some("Bearer app-token")
        {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match params.get("q").map(String::as_str) {
            Some("throttle") => {
                (StatusCode::TOO_MANY_REQUESTS, [("Retry-After", "7")], "slow down").into_response()
            }
            Some("broken") => Json(json!({"itemSummaries": []})).into_response(),
            Some("down") => (StatusCode::BAD_GATEWAY, "bad gateway").into_response(),
            _ => Json(json!({
                "total": 1,
                "itemSummaries": [{"title": "1967 Ford Mustang"}]
            }))
            .into_response(),
        }
    }

    async fn spawn_mock() -> (String, Mock) {
        let mock = Mock::default();
        let app = Router::new()
            .route("/identity/v1/oauth2/token", post(token))
            .route("/buy/browse/v1/item_summary/search", get(search))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), mock)
    }

    fn client(root: &str, clock: Arc<ManualClock>) -> EbayClient {
        let config = EbayConfig::with_root(root).with_credentials("app", "secret");
        let http = build_client(Duration::from_secs(5), Duration::from_secs(2));
        EbayClient::new(http, config, clock)
    }

    #[tokio::test]
    async fn search_reuses_token_until_refresh_window() {
        let (root, mock) = spawn_mock().await;
        let clock = Arc::new(ManualClock::at(0));
        let client = client(&root, clock.clone());

        let page = client
            .search("Ford Mustang", &Constraints::make_model("Ford", "Mustang"), 50)
            .await
            .expect("search");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "1967 Ford Mustang");
        client
            .search("Ford", &Constraints::make("Ford"), 50)
            .await
            .expect("search");
        assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(6_480));
        client
            .search("Ford", &Constraints::make("Ford"), 50)
            .await
            .expect("search");
        assert_eq!(mock.token_calls.load(Ordering::SeqCst), 2);

        let queries = mock.queries.lock().unwrap();
        assert_eq!(
            queries[0].get("aspect_filter").map(String::as_str),
            Some("categoryId:6001,Make:{Ford},Model:{Mustang}")
        );
        assert_eq!(queries[0].get("limit").map(String::as_str), Some("50"));
    }

    #[tokio::test]
    async fn search_classifies_failures() {
        let (root, _mock) = spawn_mock().await;
        let client = client(&root, Arc::new(ManualClock::at(0)));

        let err = client
            .search("throttle", &Constraints::none(), 10)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UpstreamError::RateLimited {
                retry_after_secs: Some(7),
                body: "slow down".into()
            }
        );

        let err = client
            .search("broken", &Constraints::none(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidShape(_)));

        let err = client
            .search("down", &Constraints::none(), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn missing_credentials_is_auth_error() {
        let (root, mock) = spawn_mock().await;
        let config = EbayConfig::with_root(&root);
        let http = build_client(Duration::from_secs(5), Duration::from_secs(2));
        let client = EbayClient::new(http, config, Arc::new(ManualClock::at(0)));
        let err = client
            .search("Ford", &Constraints::none(), 10)
            .await
            .unwrap_err();
        assert_eq!(err, UpstreamError::Auth(AuthError::MissingCredentials));
        assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
    }
}
