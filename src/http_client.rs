use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::config::ScoutConfig;
use crate::error::{FetchError, Result};
use crate::ttl_cache::TtlCache;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Source of raw page markup.
pub trait FetchHtml: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<String, FetchError>;
}

/// Plain GET with a browser identity and a hard timeout. Never retries.
pub struct HttpFetcher {
    client: Client,
    min_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &ScoutConfig) -> std::result::Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        if let Ok(lang) = HeaderValue::from_str(&config.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            min_body_bytes: config.min_body_bytes,
        })
    }
}

impl FetchHtml for HttpFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        let resp = self.client.get(url).send().map_err(|e| classify(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = resp.text().map_err(|e| classify(url, e))?;
        check_body(url, body, self.min_body_bytes)
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn check_body(url: &str, body: String, min: usize) -> std::result::Result<String, FetchError> {
    if body.len() < min {
        return Err(FetchError::BodyTooSmall {
            url: url.to_string(),
            len: body.len(),
            min,
        });
    }
    Ok(body)
}

/// Page-level cache in front of another fetcher, keyed by URL.
/// Only successful bodies are stored.
pub struct CachedFetcher {
    inner: Arc<dyn FetchHtml>,
    cache: Arc<TtlCache<String>>,
}

impl CachedFetcher {
    pub fn new(inner: Arc<dyn FetchHtml>, cache: Arc<TtlCache<String>>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<TtlCache<String>> {
        &self.cache
    }
}

impl FetchHtml for CachedFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<String, FetchError> {
        if let Some(body) = self.cache.get(url) {
            debug!(url, "page cache hit");
            return Ok(body);
        }
        let body = self.inner.fetch(url)?;
        debug!(url, bytes = body.len(), "fetched page");
        self.cache.put(url, body.clone());
        Ok(body)
    }
}

/// Bounded retry with exponential backoff for callers that want resilience.
/// Only transient failures (timeouts, network errors, 5xx/429) are retried.
pub fn with_retry<T, F>(mut operation: F, max_attempts: u32, base_delay: Duration) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                warn!(attempt = attempt + 1, error = %err, "transient failure, retrying");
                std::thread::sleep(base_delay.saturating_mul(2u32.saturating_pow(attempt)));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
