use crate::settings::{BrowserSettings, Settings};
use crate::Result;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, info, warn};
use serde_json::json;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use thirtyfour::prelude::*;

/// What the crawler needs from a browser. Kept narrow so tests can swap in a fake.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn wait_for_visible(&self, timeout: Duration) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    /// Clicks the first element matching `css`. Returns `false` if there is none.
    async fn click_if_present(&self, css: &str) -> Result<bool>;
    async fn page_source(&self) -> Result<String>;
}

/// A visible Chrome window driven over WebDriver.
pub struct ChromeSession {
    driver: WebDriver,
}

/// Starts Chrome on the given profile so the portal logs in from saved cookies.
///
/// When `download_dir` is set, downloads go there without a prompt. The window is
/// never headless: the portal refuses to serve pages to headless Chrome.
pub async fn launch(settings: &BrowserSettings, download_dir: Option<&Path>) -> Result<ChromeSession> {
    std::fs::create_dir_all(&settings.user_data_dir)?;
    let user_data_dir = std::fs::canonicalize(&settings.user_data_dir)?;

    let mut caps = DesiredCapabilities::chrome();
    caps.add_arg(&format!("--user-data-dir={}", user_data_dir.display()))?;

    if let Some(dir) = download_dir {
        // chrome wants an absolute download directory
        std::fs::create_dir_all(dir)?;
        let dir = std::fs::canonicalize(dir)?;
        caps.add_experimental_option(
            "prefs",
            json!({
                "profile.default_content_setting_values.automatic_downloads": 1,
                "download.default_directory": dir.display().to_string(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
            }),
        )?;
    }

    caps.add_arg("--remote-debugging-port=9222")?;
    caps.add_arg("--start-maximized")?;
    // hides the "controlled by automated test software" bar and chromedriver noise
    caps.add_experimental_option("excludeSwitches", ["enable-automation", "enable-logging"])?;

    info!("starting chrome via {}", settings.webdriver_url);
    let driver = WebDriver::new(settings.webdriver_url.as_str(), caps).await?;
    driver.set_implicit_wait_timeout(settings.implicit_wait()).await?;
    driver.set_page_load_timeout(settings.page_load_timeout()).await?;

    Ok(ChromeSession { driver })
}

impl ChromeSession {
    pub async fn quit(self) -> Result<()> {
        self.driver.quit().await?;
        Ok(())
    }
}

#[async_trait]
impl Browser for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn wait_for_visible(&self, timeout: Duration) -> Result<()> {
        self.driver
            .query(By::Tag("body"))
            .wait(timeout, Duration::from_millis(500))
            .and_displayed()
            .first()
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.driver.current_url().await?.to_string())
    }

    async fn click_if_present(&self, css: &str) -> Result<bool> {
        match self.driver.find(By::Css(css)).await {
            Ok(elem) => {
                elem.click().await?;
                Ok(true)
            }
            Err(e) => {
                debug!("no element for {css}: {e}");
                Ok(false)
            }
        }
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.driver.source().await?)
    }
}

/// Paces navigations so a long crawl doesn't hammer the portal.
pub struct Throttled<B> {
    inner: B,
    limiter: DefaultDirectRateLimiter,
}

impl<B> Throttled<B> {
    pub fn new(inner: B, requests_per_minute: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_minute).ok_or("requests_per_minute must be positive")?;
        Ok(Self {
            inner,
            limiter: RateLimiter::direct(Quota::per_minute(rate)),
        })
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B: Browser> Browser for Throttled<B> {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.limiter.until_ready().await;
        self.inner.navigate(url).await
    }

    async fn wait_for_visible(&self, timeout: Duration) -> Result<()> {
        self.inner.wait_for_visible(timeout).await
    }

    async fn current_url(&self) -> Result<String> {
        self.inner.current_url().await
    }

    async fn click_if_present(&self, css: &str) -> Result<bool> {
        self.inner.click_if_present(css).await
    }

    async fn page_source(&self) -> Result<String> {
        self.inner.page_source().await
    }
}

/// Opens the portal home page and switches the timetable to list form.
pub async fn go_manaba<B: Browser + ?Sized>(browser: &B, settings: &Settings) -> Result<()> {
    let home_url = &settings.portal.home_url;
    browser.navigate(home_url).await?;
    browser.wait_for_visible(settings.browser.visible_wait()).await?;

    // auto-login can stop at a one-time password prompt
    let current_url = browser.current_url().await?;
    if &current_url != home_url {
        warn!("failed to reach manaba home, current url: {current_url}");
    }

    if !browser.click_if_present(&settings.selectors.list_toggle).await? {
        debug!("timetable already in list form");
    }
    Ok(())
}
