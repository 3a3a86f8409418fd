use crate::browser::{go_manaba, Browser};
use crate::metadata::FileMetadata;
use crate::scrape;
use crate::settings::{Selectors, Settings};
use crate::structs::{Link, Summary};
use crate::Result;

use log::{debug, info};
use scraper::Html;

type LinkParser = fn(&Html, &Selectors, &str) -> Result<Vec<Link>>;

/// Walks courses, their contents and the pages of each content, downloading
/// every attachment it meets.
pub struct Crawler<'a, B: Browser + ?Sized> {
    browser: &'a B,
    settings: &'a Settings,
}

impl<'a, B: Browser + ?Sized> Crawler<'a, B> {
    pub fn new(browser: &'a B, settings: &'a Settings) -> Self {
        Self { browser, settings }
    }

    pub async fn run(&self) -> Result<Summary> {
        let selectors = &self.settings.selectors;
        let mut summary = Summary::default();

        go_manaba(self.browser, self.settings).await?;
        let courses = self.links_here(scrape::parse_courses).await?;
        info!("found {} course(s)", courses.len());

        for course in &courses {
            let contents_url = format!("{}{}", course.url, selectors.contents_suffix);
            self.browser.navigate(&contents_url).await?;
            let contents = self.links_here(scrape::parse_contents).await?;
            info!("{}: {} content(s)", course.title, contents.len());

            for content in &contents {
                self.browser.navigate(&content.url).await?;
                let mut pages = self.links_here(scrape::parse_pages).await?;
                if pages.is_empty() {
                    pages.push(Link {
                        title: content.title.clone(),
                        url: content.url.clone(),
                    });
                }

                let mut loaded = content.url.clone();
                for page in &pages {
                    if page.url != loaded {
                        self.browser.navigate(&page.url).await?;
                        loaded = page.url.clone();
                    }
                    let page_summary = self.fetch_page(course, content, page).await?;
                    summary.downloaded += page_summary.downloaded;
                    summary.failed += page_summary.failed;
                }
            }
        }

        Ok(summary)
    }

    /// Downloads the attachments of the page currently loaded.
    async fn fetch_page(&self, course: &Link, content: &Link, page: &Link) -> Result<Summary> {
        let source = self.browser.page_source().await?;
        let records = self.records_in(&source, course, content, page)?;
        debug!("{} attachment(s) on {}", records.len(), page.url);

        let download = &self.settings.download;
        let metadata_path = download.metadata_path();
        let mut summary = Summary::default();

        for mut record in records {
            record.download_by(self.browser, download).await?;
            record.append_to(&metadata_path)?;
            if record.can_download {
                summary.downloaded += 1;
            } else {
                summary.failed += 1;
            }
        }

        Ok(summary)
    }

    fn records_in(
        &self,
        source: &str,
        course: &Link,
        content: &Link,
        page: &Link,
    ) -> Result<Vec<FileMetadata>> {
        let doc = Html::parse_document(source);
        scrape::attachment_fragments(&doc, &self.settings.selectors.attachment)?
            .into_iter()
            .map(|fragment| {
                FileMetadata::from_fragment(
                    fragment,
                    &self.settings.portal.client_url,
                    &course.title,
                    &content.title,
                    &page.title,
                )
            })
            .collect()
    }

    async fn links_here(&self, parse: LinkParser) -> Result<Vec<Link>> {
        let source = self.browser.page_source().await?;
        let doc = Html::parse_document(&source);
        parse(&doc, &self.settings.selectors, &self.settings.portal.client_url)
    }
}
