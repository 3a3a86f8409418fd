use crate::browser::Browser;
use crate::scrape::{self, UNKNOWN};
use crate::settings::DownloadSettings;
use crate::Result;

use log::{error, info, warn};
use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const NOT_DOWNLOADED: &str = "Not downloaded";

/// One attachment on a content page and what happened when we fetched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub link: String,
    /// `YYYY-MM-DD HH:MM:SS`, or `Unknown`.
    pub upload_date: String,
    pub course_name: String,
    pub content_name: String,
    pub page_title: String,
    /// `Nothing` when the attachment has no caption text.
    pub description: String,
    pub path: String,
    pub can_download: bool,
}

impl FileMetadata {
    /// Builds a record from an attachment fragment (`div.inlineaf` on manaba).
    ///
    /// The fragment must hold a `div.inlineaf-description a` with an href; its
    /// caption is either `header` or `description<br>header`.
    pub fn from_fragment(
        fragment: ElementRef,
        client_url: &str,
        course_name: &str,
        content_name: &str,
        page_title: &str,
    ) -> Result<Self> {
        let detail_sel = scrape::selector("div.inlineaf-description a")?;
        let detail = fragment.select(&detail_sel).next().ok_or("attachment description")?;
        let href = detail.value().attr("href").ok_or("attachment link")?;

        let (description, header) = scrape::split_caption(&scrape::caption_lines(detail))?;
        let (name, upload_date) = scrape::parse_header(&header)?;

        Ok(Self {
            name,
            link: scrape::absolute_url(client_url, href),
            upload_date,
            course_name: course_name.into(),
            content_name: content_name.into(),
            page_title: page_title.into(),
            description,
            path: NOT_DOWNLOADED.into(),
            can_download: false,
        })
    }

    /// Opens the link so the browser downloads into `save_dir`, then moves the
    /// file into `save_dir/<course_name>`.
    ///
    /// A file still missing after the poll window leaves `path` as `Unknown`.
    /// A file that can't be moved stays where the browser put it.
    pub async fn download_by<B: Browser + ?Sized>(
        &mut self,
        browser: &B,
        settings: &DownloadSettings,
    ) -> Result<()> {
        let save_dir = &settings.save_dir;
        let course_dir = save_dir.join(dir_name(&self.course_name));
        fs::create_dir_all(&course_dir)?;

        browser.navigate(&self.link).await?;

        // the log shares the save root and must never pass for a download
        let metadata_path = settings.metadata_path();

        let mut resolved = None;
        for _ in 0..settings.poll_attempts {
            tokio::time::sleep(settings.poll_interval()).await;

            // the caption didn't tell us the extension, look for it on disk
            if !has_extension(&self.name) {
                if let Some(found) = find_by_stem(save_dir, &self.name, &metadata_path)? {
                    self.name = found;
                }
            }

            let src_path = save_dir.join(&self.name);
            if src_path == metadata_path || !src_path.is_file() {
                continue;
            }

            info!(
                "downloaded '{}' in {} of {}",
                self.name, self.page_title, self.course_name
            );
            self.can_download = true;

            let dest_path = course_dir.join(&self.name);
            resolved = Some(match fs::rename(&src_path, &dest_path) {
                Ok(()) => {
                    info!("moved '{}' to {}", self.name, dest_path.display());
                    dest_path
                }
                Err(e) => {
                    error!(
                        "failed to move '{}' in {} of {}: {e:?}",
                        self.name, self.page_title, self.course_name
                    );
                    src_path
                }
            });
            break;
        }

        self.path = match resolved {
            Some(path) => path.display().to_string(),
            None => {
                warn!(
                    "failed to download '{}' in {} of {}",
                    self.name, self.page_title, self.course_name
                );
                UNKNOWN.into()
            }
        };
        Ok(())
    }

    /// Appends this record as one JSON line.
    pub fn append_to(&self, json_path: &Path) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(json_path)?;
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }
}

/// Course names can carry path separators; keep each course one level deep.
fn dir_name(course_name: &str) -> String {
    course_name.replace(['/', '\\'], "_")
}

fn has_extension(name: &str) -> bool {
    Path::new(name).extension().is_some()
}

/// Name of a finished download in `dir` whose stem is `stem`, other than `skip`.
fn find_by_stem(dir: &Path, stem: &str, skip: &Path) -> Result<Option<String>> {
    for entry in fs::read_dir(dir)? {
        let path: PathBuf = entry?.path();
        if path == skip
            || !path.is_file()
            || path.extension().is_some_and(|ext| ext == "crdownload")
        {
            continue;
        }
        if path.file_stem().is_some_and(|s| s == stem) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                return Ok(Some(name.into()));
            }
        }
    }
    Ok(None)
}
