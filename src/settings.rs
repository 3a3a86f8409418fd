use crate::Result;

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const LIST_TOGGLE: &str = "#container > div.pagebody > div > div.contentbody-left > div.my-infolist.my-infolist-mycourses.my-infolist-mycourses-weekly > ul > li:nth-child(2) > a";

/// Everything the run needs, loaded from `manaba.{toml,json,...}` and `MANABA_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub portal: PortalSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub selectors: Selectors,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSettings {
    /// Page the browser lands on after auto-login.
    pub home_url: String,
    /// Prefix for the relative links found in portal markup.
    pub client_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub user_data_dir: PathBuf,
    pub implicit_wait_secs: u64,
    pub page_load_timeout_secs: u64,
    pub visible_wait_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".into(),
            user_data_dir: PathBuf::from("./userdata"),
            implicit_wait_secs: 5,
            page_load_timeout_secs: 10,
            visible_wait_secs: 30,
            requests_per_minute: 30,
        }
    }
}

impl BrowserSettings {
    pub fn implicit_wait(&self) -> Duration {
        Duration::from_secs(self.implicit_wait_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn visible_wait(&self) -> Duration {
        Duration::from_secs(self.visible_wait_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Browser download directory; per-course folders are created below it.
    pub save_dir: PathBuf,
    /// JSON Lines log of every record. Relative paths live under `save_dir`.
    pub metadata_file: PathBuf,
    pub poll_attempts: u32,
    pub poll_interval_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("./downloads"),
            metadata_file: PathBuf::from("file_metadata.jsonl"),
            poll_attempts: 10,
            poll_interval_ms: 2000,
        }
    }
}

impl DownloadSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn metadata_path(&self) -> PathBuf {
        // join() keeps an absolute metadata_file as is
        self.save_dir.join(&self.metadata_file)
    }
}

/// CSS selectors for the portal pages. The defaults follow manaba's markup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub list_toggle: String,
    pub course_link: String,
    pub content_link: String,
    pub page_link: String,
    pub attachment: String,
    /// Appended to a course URL to reach its contents list.
    pub contents_suffix: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            list_toggle: LIST_TOGGLE.into(),
            course_link: "table.courselist td.courselist-title a".into(),
            content_link: ".contentslist .about-contents a".into(),
            page_link: ".contentslist-page a, .contents-pagelist a".into(),
            attachment: "div.inlineaf".into(),
            contents_suffix: "_page".into(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("manaba").required(false))
            .add_source(environment())
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings: Settings = config.try_deserialize()?;
        if settings.browser.requests_per_minute == 0 {
            Err("browser.requests_per_minute must be positive")?
        }
        if settings.download.poll_attempts == 0 {
            Err("download.poll_attempts must be positive")?
        }
        Ok(settings)
    }
}

/// `MANABA_DOWNLOAD__SAVE_DIR` sets `download.save_dir`.
fn environment() -> Environment {
    Environment::with_prefix("MANABA")
        .prefix_separator("_")
        .separator("__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> Result<Settings> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Settings::from_config(config)
    }

    #[test]
    fn defaults_fill_everything_but_portal() {
        let settings = from_toml(
            r#"
            [portal]
            home_url = "https://room.example.ac.jp/ct/home"
            client_url = "https://room.example.ac.jp/ct/"
            "#,
        )
        .unwrap();

        assert_eq!(settings.browser.webdriver_url, "http://localhost:9515");
        assert_eq!(settings.browser.implicit_wait(), Duration::from_secs(5));
        assert_eq!(settings.browser.page_load_timeout(), Duration::from_secs(10));
        assert_eq!(settings.download.poll_attempts, 10);
        assert_eq!(settings.download.poll_interval(), Duration::from_secs(2));
        assert_eq!(
            settings.download.metadata_path(),
            PathBuf::from("./downloads/file_metadata.jsonl")
        );
        assert_eq!(settings.selectors.attachment, "div.inlineaf");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let settings = from_toml(
            r#"
            [portal]
            home_url = "h"
            client_url = "c"

            [download]
            save_dir = "/tmp/manaba"
            poll_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(settings.download.save_dir, PathBuf::from("/tmp/manaba"));
        assert_eq!(settings.download.poll_attempts, 10);
        assert_eq!(settings.download.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn missing_portal_is_an_error() {
        assert!(from_toml("[download]\npoll_attempts = 3\n").is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let mut vars = config::Map::new();
        vars.insert("MANABA_PORTAL__HOME_URL".to_string(), "https://env.example/ct/home".to_string());
        vars.insert("MANABA_DOWNLOAD__POLL_ATTEMPTS".to_string(), "3".to_string());
        vars.insert("OTHER_DOWNLOAD__POLL_ATTEMPTS".to_string(), "99".to_string());

        let config = Config::builder()
            .add_source(File::from_str(
                r#"
                [portal]
                home_url = "https://file.example/ct/home"
                client_url = "https://file.example/ct/"

                [download]
                poll_attempts = 7
                poll_interval_ms = 100
                "#,
                FileFormat::Toml,
            ))
            .add_source(environment().source(Some(vars)))
            .build()
            .unwrap();
        let settings = Settings::from_config(config).unwrap();

        assert_eq!(settings.portal.home_url, "https://env.example/ct/home");
        assert_eq!(settings.portal.client_url, "https://file.example/ct/");
        assert_eq!(settings.download.poll_attempts, 3);
        assert_eq!(settings.download.poll_interval_ms, 100);
    }

    #[test]
    fn zero_poll_attempts_is_rejected() {
        let res = from_toml(
            r#"
            [portal]
            home_url = "h"
            client_url = "c"

            [download]
            poll_attempts = 0
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let res = from_toml(
            r#"
            [portal]
            home_url = "h"
            client_url = "c"

            [browser]
            requests_per_minute = 0
            "#,
        );
        assert!(res.is_err());
    }
}
