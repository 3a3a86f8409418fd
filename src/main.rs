mod browser;
mod crawl;
mod metadata;
mod scrape;
mod settings;
mod structs;

use crate::browser::Throttled;
use crate::crawl::Crawler;
use crate::settings::Settings;
use crate::structs::Summary;

use env_logger::Env;
use log::{error, info};
use std::error::Error;

pub type Result<T> = std::result::Result<T, Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = Settings::load()?;
    let download = &settings.download;

    let session = browser::launch(&settings.browser, Some(download.save_dir.as_path())).await?;
    let browser = Throttled::new(session, settings.browser.requests_per_minute)?;

    let crawled = Crawler::new(&browser, &settings).run().await;
    // close the window even when the crawl failed
    let closed = browser.into_inner().quit().await;
    let summary = settle(crawled, closed)?;

    info!(
        "done: {} downloaded, {} failed, metadata in {}",
        summary.downloaded,
        summary.failed,
        download.metadata_path().display()
    );
    Ok(())
}

/// Crawl errors win over a failure to close the browser, which is only logged then.
fn settle(crawled: Result<Summary>, closed: Result<()>) -> Result<Summary> {
    match (crawled, closed) {
        (Ok(summary), Ok(())) => Ok(summary),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(quit_err)) => {
            error!("failed to close browser: {quit_err}");
            Err(e)
        }
    }
}
