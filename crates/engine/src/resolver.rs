use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use theodore_common::types::normalize_name;
use theodore_common::urlnorm;
use theodore_fetch::HttpFetcher;

pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

/// Looks up a company's canonical website when the caller did not supply
/// one. The production deployment can plug in a search-backed
/// implementation; the default guesses domains from the name.
pub trait SiteResolver: Send + Sync {
    fn resolve<'a>(&'a self, company_name: &'a str) -> ResolverFuture<'a>;
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Domain-guessing resolver: slugify the name, probe the usual TLDs, take
/// the first host that answers.
pub struct GuessingResolver {
    fetcher: Arc<HttpFetcher>,
}

impl GuessingResolver {
    pub fn new(fetcher: Arc<HttpFetcher>) -> Self {
        Self { fetcher }
    }
}

impl SiteResolver for GuessingResolver {
    fn resolve<'a>(&'a self, company_name: &'a str) -> ResolverFuture<'a> {
        Box::pin(async move {
            let slug = name_slug(company_name);
            if slug.is_empty() {
                return None;
            }

            let guesses = [
                format!("https://{}.com", slug),
                format!("https://www.{}.com", slug),
                format!("https://{}.io", slug),
                format!("https://{}.co", slug),
            ];

            for guess in guesses {
                match self.fetcher.probe(&guess, PROBE_TIMEOUT).await {
                    Ok(status) if status < 400 => {
                        tracing::info!(company = %company_name, website = %guess, "Resolved website by domain guess");
                        return urlnorm::normalize_url(&guess);
                    }
                    _ => continue,
                }
            }

            tracing::info!(company = %company_name, "No website guess answered");
            None
        })
    }
}

/// "Acme Labs, Inc." → "acmelabs".
fn name_slug(name: &str) -> String {
    normalize_name(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_slug() {
        assert_eq!(name_slug("Acme Labs, Inc."), "acmelabs");
        assert_eq!(name_slug("Stripe"), "stripe");
        assert_eq!(name_slug("!!!"), "");
    }
}
