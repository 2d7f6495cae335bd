//! Route origin validation against the RIPEstat `rpki-validation` data call.

use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracer_core::error::stage;
use tracer_core::ratelimiter::RateLimiter;
use tracer_core::{log_trace, log_warn, Logger, PipelineError, Result, RouteValidator, ValidationStatus};
use url::Url;

pub const RIPE_STAT_URL: &str = "https://stat.ripe.net/data/rpki-validation/data.json";

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Request pacing; `None` sends as fast as the caller asks.
    pub qps: Option<u32>,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        ValidatorOptions {
            base_url: RIPE_STAT_URL.into(),
            timeout_ms: 15_000,
            user_agent: format!("rpki-tracer/{}", tracer_core::version()),
            qps: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Data>,
}

#[derive(Debug, Deserialize)]
struct Data {
    status: Option<String>,
}

/// Maps the service's status string; `None` for anything unrecognized.
pub fn classify_status(status: &str) -> Option<ValidationStatus> {
    if status == "valid" {
        Some(ValidationStatus::Valid)
    } else if status.contains("invalid") {
        Some(ValidationStatus::Invalid(status.to_string()))
    } else if status == "unknown" {
        Some(ValidationStatus::NotFound)
    } else {
        None
    }
}

/// Extracts and classifies `data.status` from a raw response body.
pub fn status_from_payload(asn: u32, prefix: &IpNet, body: &str) -> Result<ValidationStatus> {
    let env: Envelope = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed(stage::VALIDATE, format!("AS{} {}: {}", asn, prefix, e), body))?;
    let status = env
        .data
        .and_then(|d| d.status)
        .ok_or_else(|| PipelineError::malformed(stage::VALIDATE, format!("AS{} {}: no data.status", asn, prefix), body))?;
    classify_status(&status).ok_or_else(|| PipelineError::UnrecognizedValidationStatus {
        asn,
        prefix: prefix.to_string(),
        status,
        raw: body.to_string(),
    })
}

pub struct RipeStat {
    client: Client,
    base: Url,
    limiter: Option<RateLimiter>,
}

impl RipeStat {
    /// With `qps` set this must run inside a tokio runtime.
    pub fn new(opts: ValidatorOptions) -> Result<Self> {
        let base = Url::parse(&opts.base_url)
            .map_err(|e| PipelineError::service(stage::VALIDATE, format!("base url {}", opts.base_url), e))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(opts.timeout_ms))
            .user_agent(opts.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| PipelineError::service(stage::VALIDATE, "http client", e))?;
        let limiter = opts.qps.filter(|q| *q > 0).map(RateLimiter::new);
        Ok(RipeStat { client, base, limiter })
    }

    pub fn request_url(&self, asn: u32, prefix: &IpNet) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("resource", &asn.to_string())
            .append_pair("prefix", &prefix.to_string());
        url
    }
}

#[async_trait]
impl RouteValidator for RipeStat {
    async fn validate(&self, asn: u32, prefix: &IpNet, logger: &dyn Logger) -> Result<ValidationStatus> {
        if let Some(l) = &self.limiter {
            l.acquire().await;
        }
        let url = self.request_url(asn, prefix);
        let ctx = || format!("AS{} {}", asn, prefix);
        log_trace!(logger, "GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::service(stage::VALIDATE, ctx(), e))?;
        let body = resp.text().await.map_err(|e| PipelineError::service(stage::VALIDATE, ctx(), e))?;
        let status = status_from_payload(asn, prefix, &body)?;
        if let ValidationStatus::Invalid(variant) = &status {
            log_warn!(logger, "Invalid Type: {} (AS{} {})", variant, asn, prefix);
        }
        Ok(status)
    }
}

/// Memoizes (asn, prefix) answers of another validator.
pub struct CachedValidator<V> {
    inner: V,
    cache: Mutex<HashMap<(u32, IpNet), ValidationStatus>>,
}

impl<V: RouteValidator> CachedValidator<V> {
    pub fn new(inner: V) -> Self {
        CachedValidator { inner, cache: Mutex::new(HashMap::new()) }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lookup(&self, key: &(u32, IpNet)) -> Option<ValidationStatus> {
        self.cache.lock().ok().and_then(|c| c.get(key).cloned())
    }
}

#[async_trait]
impl<V: RouteValidator> RouteValidator for CachedValidator<V> {
    async fn validate(&self, asn: u32, prefix: &IpNet, logger: &dyn Logger) -> Result<ValidationStatus> {
        let key = (asn, *prefix);
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let status = self.inner.validate(asn, prefix, logger).await?;
        if let Ok(mut c) = self.cache.lock() {
            c.insert(key, status.clone());
        }
        Ok(status)
    }
}
