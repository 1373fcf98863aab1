//! Page fetchers: plain HTTP and (optionally) a headless browser.

use super::consent::{is_blocked_url, is_cloudflare_challenge};
use crate::error::{PanelistError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// How long to wait for a Cloudflare interstitial to clear before retrying.
pub const CLOUDFLARE_WAIT: Duration = Duration::from_secs(5);

/// A fetched page after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub html: String,
    pub status: u16,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Fetch over HTTP. Cannot click consent dialogs, so it is the fallback when
/// no browser is available.
pub struct HttpFetcher {
    http: reqwest::Client,
    cloudflare_wait: Duration,
}

impl HttpFetcher {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cloudflare_wait: CLOUDFLARE_WAIT,
        }
    }

    async fn get(&self, url: &str) -> Result<FetchedPage> {
        let response = self.http.get(url).send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response.text().await?;
        Ok(FetchedPage {
            url: final_url,
            html,
            status,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        debug!("Fetching {} over HTTP", url);
        let mut page = self.get(url).await?;
        if is_cloudflare_challenge(&page.html) {
            warn!("Cloudflare challenge at {}, retrying once", url);
            tokio::time::sleep(self.cloudflare_wait).await;
            page = self.get(url).await?;
            if is_cloudflare_challenge(&page.html) {
                return Err(PanelistError::Resolve(format!(
                    "Cloudflare challenge did not clear for {}",
                    url
                )));
            }
        }
        check_page(url, &page)?;
        Ok(page)
    }
}

/// Reject error pages and consent walls.
pub(crate) fn check_page(requested: &str, page: &FetchedPage) -> Result<()> {
    if is_blocked_url(&page.url) {
        return Err(PanelistError::Resolve(format!(
            "{} ended on {}",
            requested, page.url
        )));
    }
    if page.status >= 400 {
        return Err(PanelistError::Resolve(format!(
            "{} returned HTTP {}",
            requested, page.status
        )));
    }
    Ok(())
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned HTML keyed by URL. Unknown URLs fail.
    #[derive(Default)]
    pub struct StaticFetcher {
        pages: Mutex<HashMap<String, FetchedPage>>,
    }

    impl StaticFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(self, url: &str, html: &str) -> Self {
            self.redirect(url, url, html)
        }

        pub fn redirect(self, url: &str, final_url: &str, html: &str) -> Self {
            self.pages.lock().unwrap().insert(
                url.to_string(),
                FetchedPage {
                    url: final_url.to_string(),
                    html: html.to_string(),
                    status: 200,
                },
            );
            self
        }
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            let page = self
                .pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| PanelistError::Resolve(format!("no page for {}", url)))?;
            check_page(url, &page)?;
            Ok(page)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::StaticFetcher;
    use super::*;

    #[tokio::test]
    async fn test_consent_redirect_is_rejected() {
        let fetcher = StaticFetcher::new()
            .page("https://ok.test/a", "<p>fine</p>")
            .redirect("https://wall.test/b", "https://consent.wall.test/?continue=b", "<p>agree</p>");

        assert!(fetcher.fetch("https://ok.test/a").await.is_ok());
        let err = fetcher.fetch("https://wall.test/b").await.unwrap_err();
        assert!(err.to_string().contains("consent.wall.test"));
    }

    #[test]
    fn test_error_status_is_rejected() {
        let page = FetchedPage {
            url: "https://x.test/".to_string(),
            html: String::new(),
            status: 404,
        };
        assert!(check_page("https://x.test/", &page).is_err());
    }
}
