//! Rate-limited outbound HTTP exposed to templates as `requests`.

use crate::config::RequestsConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use minijinja::value::{from_args, Object, Value};
use minijinja::{Error, ErrorKind, State};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// HTTP client shared by all renders of the process.
#[derive(Debug)]
pub struct RequestsClient {
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
    limit: u32,
    timeout: Duration,
}

impl RequestsClient {
    /// Build a client from configuration; `None` when requests are disabled.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be created.
    pub fn from_config(config: &RequestsConfig) -> Result<Option<Self>, reqwest::Error> {
        if !config.enabled {
            return Ok(None);
        }
        let per_second = NonZeroU32::new(config.per_second).unwrap_or(NonZeroU32::MIN);
        let client = reqwest::Client::builder()
            .user_agent(concat!("document-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Some(Self {
            client,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            limit: config.limit,
            timeout: Duration::from_secs(config.timeout_secs),
        }))
    }

    /// Per-render handle counting requests against the render limit.
    ///
    /// Must be called from within a Tokio runtime; requests block the render
    /// thread on that runtime.
    #[must_use]
    pub fn session(self: &Arc<Self>, handle: Handle) -> Value {
        Value::from_object(RequestSession {
            client: Arc::clone(self),
            handle,
            used: AtomicU32::new(0),
        })
    }

    async fn get(&self, url: &str) -> Result<Value, reqwest::Error> {
        self.limiter.until_ready().await;
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let json = serde_json::from_str::<serde_json::Value>(&text)
            .map_or_else(|_| Value::default(), |json| Value::from_serialize(&json));
        debug!(url, status, "Template request completed");
        Ok([
            ("status", Value::from(status)),
            ("ok", Value::from((200..300).contains(&status))),
            ("text", Value::from(text)),
            ("json", json),
        ]
        .into_iter()
        .collect())
    }
}

#[derive(Debug)]
struct RequestSession {
    client: Arc<RequestsClient>,
    handle: Handle,
    used: AtomicU32,
}

impl Object for RequestSession {
    fn call_method(self: &Arc<Self>, _state: &State<'_, '_>, method: &str, args: &[Value]) -> Result<Value, Error> {
        if method != "get" {
            return Err(Error::from(ErrorKind::UnknownMethod));
        }
        let (url,): (String,) = from_args(args)?;
        if self.used.fetch_add(1, Ordering::SeqCst) >= self.client.limit {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("request limit of {} per document exceeded", self.client.limit),
            ));
        }
        self.handle
            .block_on(self.client.get(&url))
            .map_err(|err| Error::new(ErrorKind::InvalidOperation, format!("request to {url} failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_requests_build_no_client() {
        let config = RequestsConfig::default();
        assert!(RequestsClient::from_config(&config).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_render_limit_is_enforced() {
        let config = RequestsConfig {
            enabled: true,
            limit: 0,
            ..RequestsConfig::default()
        };
        let client = Arc::new(RequestsClient::from_config(&config).unwrap().unwrap());
        let session = client.session(Handle::current());

        let rendered = tokio::task::spawn_blocking(move || {
            let env = minijinja::Environment::new();
            env.render_str("{{ requests.get('http://127.0.0.1:9/') }}", minijinja::context! { requests => session })
        })
        .await
        .unwrap();

        let err = rendered.unwrap_err();
        assert!(err.to_string().contains("request limit"), "{err}");
    }
}
