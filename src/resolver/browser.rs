//! Headless Chrome fetcher with consent clicking and Cloudflare waits.

use super::consent::{consent_click_script, is_cloudflare_challenge, CONSENT_ROUNDS};
use super::fetcher::{check_page, FetchedPage, PageFetcher, CLOUDFLARE_WAIT};
use crate::config::BrowserSettings;
use crate::error::{PanelistError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

fn browser_error(context: &str, e: impl std::fmt::Display) -> PanelistError {
    PanelistError::Resolve(format!("{}: {}", context, e))
}

/// Lazily launches (or connects to) Chrome on first fetch.
pub struct BrowserFetcher {
    settings: BrowserSettings,
    browser: OnceCell<Browser>,
}

impl BrowserFetcher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            browser: OnceCell::new(),
        }
    }

    async fn browser(&self) -> Result<&Browser> {
        self.browser
            .get_or_try_init(|| async {
                match &self.settings.remote_url {
                    Some(url) => self.connect_remote(url).await,
                    None => self.launch().await,
                }
            })
            .await
    }

    async fn launch(&self) -> Result<Browser> {
        info!("Launching browser (headless: {})", self.settings.headless);
        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_secs(self.settings.timeout_secs));
        if !self.settings.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run");
        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| browser_error("Invalid browser config", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| browser_error("Failed to launch browser", e))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(browser)
    }

    async fn connect_remote(&self, url: &str) -> Result<Browser> {
        info!("Connecting to remote browser at {}", url);
        let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));
        let version: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await?
            .json()
            .await?;
        let ws_url = version
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PanelistError::Resolve("No webSocketDebuggerUrl in response".to_string()))?;

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.settings.timeout_secs),
            ..Default::default()
        };
        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| browser_error("Failed to connect to remote browser", e))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        Ok(browser)
    }

    async fn wait_ready(&self, page: &Page) {
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        match tokio::time::timeout(timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| browser_error("Invalid URL", e))?;
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        tokio::time::timeout(timeout, page.execute(params))
            .await
            .map_err(|_| {
                PanelistError::Timeout(format!(
                    "Navigation timed out after {}s for {}",
                    self.settings.timeout_secs, url
                ))
            })?
            .map_err(|e| browser_error(&format!("Navigation failed for {}", url), e))?;
        self.wait_ready(page).await;
        Ok(())
    }

    /// Click through consent dialogs until none is found or rounds run out.
    async fn accept_consent(&self, page: &Page) {
        let script = consent_click_script();
        for round in 0..CONSENT_ROUNDS {
            let clicked = match page.evaluate(script.clone()).await {
                Ok(result) => result.into_value::<String>().unwrap_or_default(),
                Err(e) => {
                    debug!("Consent script failed: {}", e);
                    return;
                }
            };
            if clicked.is_empty() {
                return;
            }
            debug!("Accepted {} consent (round {})", clicked, round + 1);
            tokio::time::sleep(Duration::from_millis(800)).await;
            self.wait_ready(page).await;
        }
    }

    async fn fetch_inner(&self, page: &Page, url: &str) -> Result<FetchedPage> {
        page.execute(SetUserAgentOverrideParams::new(self.settings.user_agent.clone()))
            .await
            .map_err(|e| browser_error("Failed to set user agent", e))?;
        self.navigate(page, url).await?;

        let mut html = page
            .content()
            .await
            .map_err(|e| browser_error("Failed to read page", e))?;
        if is_cloudflare_challenge(&html) {
            warn!("Cloudflare challenge at {}, waiting", url);
            tokio::time::sleep(CLOUDFLARE_WAIT).await;
            page.reload()
                .await
                .map_err(|e| browser_error("Reload failed", e))?;
            self.wait_ready(page).await;
            html = page
                .content()
                .await
                .map_err(|e| browser_error("Failed to read page", e))?;
            if is_cloudflare_challenge(&html) {
                return Err(PanelistError::Resolve(format!(
                    "Cloudflare challenge did not clear for {}",
                    url
                )));
            }
        }

        self.accept_consent(page).await;
        let final_url = page
            .url()
            .await
            .map_err(|e| browser_error("Failed to read URL", e))?
            .unwrap_or_else(|| url.to_string());
        let html = page
            .content()
            .await
            .map_err(|e| browser_error("Failed to read page", e))?;

        let fetched = FetchedPage {
            url: final_url,
            html,
            status: 200,
        };
        check_page(url, &fetched)?;
        Ok(fetched)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let browser = self.browser().await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| browser_error("Failed to open page", e))?;
        let result = self.fetch_inner(&page, url).await;
        let _ = page.close().await;
        result
    }
}
