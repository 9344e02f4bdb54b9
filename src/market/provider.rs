use crate::error::UpstreamError;
use crate::http::retry_after_secs;
use crate::models::{ValuationRequest, ValuationSource, VehicleKey};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Instant;

/// Price band returned by a valuation provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Quote {
    pub low: f64,
    pub avg: f64,
    pub high: f64,
    pub currency: String,
    pub source: ValuationSource,
}

impl Quote {
    fn validate(self) -> Result<Self, UpstreamError> {
        let ordered = self.low <= self.avg && self.avg <= self.high;
        let finite = [self.low, self.avg, self.high].iter().all(|v| v.is_finite() && *v >= 0.0);
        if !ordered || !finite {
            return Err(UpstreamError::InvalidShape(format!(
                "price band out of order: low={} avg={} high={}",
                self.low, self.avg, self.high
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(UpstreamError::InvalidShape("missing currency".into()));
        }
        Ok(self)
    }
}

#[async_trait]
pub trait ValuationProvider: Send + Sync {
    async fn value(
        &self,
        key: &VehicleKey,
        request: &ValuationRequest,
    ) -> Result<Quote, UpstreamError>;
}

pub struct HttpValuationProvider {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpValuationProvider {
    pub fn new(http: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ValuationProvider for HttpValuationProvider {
    async fn value(
        &self,
        key: &VehicleKey,
        request: &ValuationRequest,
    ) -> Result<Quote, UpstreamError> {
        let mut params = vec![
            ("make", key.make().to_string()),
            ("model", key.model().to_string()),
            ("year", key.year().to_string()),
        ];
        if let Some(mileage) = request.mileage {
            params.push(("mileage", mileage.to_string()));
        }
        if let Some(trim) = request.trim.as_deref().filter(|t| !t.trim().is_empty()) {
            params.push(("trim", trim.trim().to_string()));
        }
        if let Some(zip) = request.zip_code.as_deref().filter(|z| !z.trim().is_empty()) {
            params.push(("zip", zip.trim().to_string()));
        }

        let started = Instant::now();
        let mut call = self
            .http
            .get(format!("{}/v1/valuation", self.base_url))
            .query(&params);
        if let Some(api_key) = &self.api_key {
            call = call.header("X-API-Key", api_key);
        }
        let response = call.send().await?;
        crate::metrics::upstream_call("valuation", started.elapsed().as_millis());

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), retry_after, body));
        }
        let quote: Quote = response.json().await?;
        quote.validate()
    }
}

/// Stand-in used when no valuation endpoint is configured.
pub struct DisabledProvider;

#[async_trait]
impl ValuationProvider for DisabledProvider {
    async fn value(
        &self,
        _key: &VehicleKey,
        _request: &ValuationRequest,
    ) -> Result<Quote, UpstreamError> {
        Err(UpstreamError::Status {
            status: 503,
            body: "valuation provider is not configured".into(),
        })
    }
}
