use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::settings::Settings;
use crate::error::FetchError;

/// Source of raw page bodies.
pub trait PageFetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.backoff_ms),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        with_retry(url, self.max_retries, self.backoff, move || self.fetch_once(url)).await
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are used up. The wait doubles after every attempt.
pub async fn with_retry<F, Fut>(
    url: &str,
    max_retries: u32,
    backoff: Duration,
    mut op: F,
) -> Result<String, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(body) => return Ok(body),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let wait = backoff * 2u32.saturating_pow(attempt);
                warn!(
                    url,
                    attempt = attempt + 1,
                    max_retries,
                    backoff_secs = wait.as_secs_f64(),
                    error = %e,
                    "retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Serves fixed bodies by URL.
#[cfg(test)]
pub struct StaticFetcher {
    pages: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl StaticFetcher {
    pub fn new<I, K, V>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        StaticFetcher {
            pages: pages
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}
