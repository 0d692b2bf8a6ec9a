use std::collections::HashSet;
use std::time::Duration;

use reqwest::redirect::Policy;
use tokio::sync::Mutex;

use theodore_common::config::HttpConfig;
use theodore_common::urlnorm;
use theodore_common::TheodoreError;

use crate::cache::UrlCache;

const MAX_REDIRECTS: usize = 5;

/// A fetched HTTP response, body already read.
#[derive(Clone, Debug)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(url.to_string())
        } else {
            Self::Transport(format!("{}: {}", url, e))
        }
    }
}

/// Shared HTTP client for site traffic: TLS verified by default, redirects
/// capped, responses cached with a TTL. Hosts listed in
/// `http.insecure_hosts` get a separate certificate-tolerant client; every
/// such fetch logs a warning naming the host.
pub struct HttpFetcher {
    client: reqwest::Client,
    insecure_client: Option<reqwest::Client>,
    insecure_hosts: HashSet<String>,
    cache: Mutex<UrlCache>,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, TheodoreError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| TheodoreError::config(format!("failed to build HTTP client: {}", e)))?;

        let insecure_hosts: HashSet<String> = config
            .insecure_hosts
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();

        let insecure_client = if insecure_hosts.is_empty() {
            None
        } else {
            Some(
                reqwest::Client::builder()
                    .user_agent(&config.user_agent)
                    .redirect(Policy::limited(MAX_REDIRECTS))
                    .danger_accept_invalid_certs(true)
                    .build()
                    .map_err(|e| {
                        TheodoreError::config(format!("failed to build insecure client: {}", e))
                    })?,
            )
        };

        Ok(Self {
            client,
            insecure_client,
            insecure_hosts,
            cache: Mutex::new(UrlCache::new(Duration::from_secs(config.cache_ttl_secs))),
        })
    }

    /// GET a URL with the given total timeout. Non-2xx statuses are returned
    /// as pages, not errors; only transport-level failures error out.
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        {
            let cache = self.cache.lock().await;
            if let Some(page) = cache.get(url) {
                return Ok(page);
            }
        }

        let start = std::time::Instant::now();
        let client = self.client_for(url);

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let domain = urlnorm::host_of(url).unwrap_or_else(|| "unknown".into());
        metrics::histogram!("fetch.request.latency", "domain" => domain)
            .record(start.elapsed().as_secs_f64());

        let page = FetchedPage {
            url: final_url,
            status,
            content_type,
            body,
        };

        if (200..300).contains(&status) {
            let mut cache = self.cache.lock().await;
            cache.insert(url.to_string(), page.clone());
        }

        Ok(page)
    }

    /// HEAD probe. Returns the status code only; never cached.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<u16, FetchError> {
        let client = self.client_for(url);

        let response = client
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        Ok(response.status().as_u16())
    }

    fn client_for(&self, url: &str) -> &reqwest::Client {
        if let Some(host) = urlnorm::host_of(url) {
            if self.insecure_hosts.contains(&host) {
                if let Some(ref insecure) = self.insecure_client {
                    tracing::warn!(host = %host, "TLS verification disabled for this host");
                    metrics::counter!("fetch.insecure.requests", "host" => host).increment(1);
                    return insecure;
                }
            }
        }
        &self.client
    }
}

/// Whether a response looks like a bot-protection wall rather than content:
/// a hard 403, or a challenge interstitial.
pub fn is_protected(page: &FetchedPage) -> bool {
    if page.status == 403 {
        return true;
    }

    if page.status == 503 {
        let body = page.body.to_lowercase();
        return body.contains("just a moment")
            || body.contains("challenge-platform")
            || body.contains("attention required")
            || body.contains("cf-chl");
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://acme.example/".into(),
            status,
            content_type: Some("text/html".into()),
            body: body.into(),
        }
    }

    #[test]
    fn test_protected_detection() {
        assert!(is_protected(&page(403, "Forbidden")));
        assert!(is_protected(&page(
            503,
            "<title>Just a moment...</title><div id=\"cf-chl-widget\"></div>"
        )));
        assert!(!is_protected(&page(503, "scheduled maintenance")));
        assert!(!is_protected(&page(200, "welcome")));
    }

    #[test]
    fn test_fetcher_builds_without_insecure_hosts() {
        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        assert!(fetcher.insecure_client.is_none());
    }

    #[test]
    fn test_fetcher_builds_insecure_client_when_configured() {
        let config = HttpConfig {
            insecure_hosts: vec!["Legacy.Example.COM".into()],
            ..HttpConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert!(fetcher.insecure_client.is_some());
        assert!(fetcher.insecure_hosts.contains("legacy.example.com"));
    }
}
