//! Cover image acquisition from the Unsplash random-photo API.
//!
//! Only used when the book directory has no cover of its own. Failures are
//! logged and swallowed by [`ensure_cover`]; the caller decides what a
//! missing cover means.

use crate::error::{Error, Result};
use log::{debug, info, warn};
use reqwest::{Client, Request};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_API_URL: &str = "https://api.unsplash.com/photos/random";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Search parameters for the cover photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsplashConfig {
    pub api_url: String,
    /// Unsplash access key
    pub client_id: Option<String>,
    /// `landscape`, `portrait` or `squarish`
    pub orientation: Option<String>,
    /// Search term
    pub query: Option<String>,
    pub timeout_secs: u64,
}

impl Default for UnsplashConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            client_id: None,
            orientation: None,
            query: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Photo {
    urls: PhotoUrls,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    thumb: String,
}

/// `/photos/random` answers with an array when `count` is given, an object otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RandomPhotos {
    Many(Vec<Photo>),
    One(Photo),
}

impl RandomPhotos {
    fn first_thumb(self) -> Option<String> {
        match self {
            RandomPhotos::Many(photos) => photos.into_iter().next().map(|p| p.urls.thumb),
            RandomPhotos::One(photo) => Some(photo.urls.thumb),
        }
    }
}

pub struct CoverFetcher {
    client: Client,
    config: UnsplashConfig,
}

impl CoverFetcher {
    pub fn new(config: UnsplashConfig) -> Result<Self> {
        if config.client_id.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "UNSPLASH_CLIENT_ID is not set, cannot search for a cover".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("client_id", self.config.client_id.clone().unwrap_or_default()),
            ("count", "1".to_string()),
        ];
        if let Some(orientation) = &self.config.orientation {
            params.push(("orientation", orientation.clone()));
        }
        if let Some(query) = &self.config.query {
            params.push(("query", query.clone()));
        }
        params
    }

    fn search_request(&self) -> Result<Request> {
        self.client
            .get(&self.config.api_url)
            .query(&self.query_params())
            .build()
            .map_err(|e| Error::Network(e.to_string()))
    }

    /// Asks the API for a random photo and returns its thumbnail URL.
    pub async fn search(&self) -> Result<String> {
        let request = self.search_request()?;
        debug!("Searching cover photo at {}", self.config.api_url);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CoverApi {
                status: status.as_u16(),
                url: self.config.api_url.clone(),
            });
        }

        let photos: RandomPhotos = response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        photos.first_thumb().ok_or(Error::NoCoverResults)
    }

    /// Downloads `url` into `dest`, creating parent directories.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        debug!("Downloading cover from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CoverApi {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        fs::write(dest, &bytes)
            .await
            .map_err(|e| Error::io(dest, e))?;
        Ok(())
    }

    pub async fn fetch_to(&self, dest: &Path) -> Result<()> {
        let thumb = self.search().await?;
        self.download(&thumb, dest).await
    }
}

/// Makes sure a cover exists at `dest`, downloading one if needed.
///
/// Returns whether a cover file is present afterwards.
pub async fn ensure_cover(config: &UnsplashConfig, dest: &Path) -> bool {
    if fs::metadata(dest).await.is_ok() {
        return true;
    }

    info!("No cover at {}, downloading a new one", dest.display());
    let result = match CoverFetcher::new(config.clone()) {
        Ok(fetcher) => fetcher.fetch_to(dest).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("Cover saved to {}", dest.display());
            true
        }
        Err(e) => {
            warn!("Cover download failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> UnsplashConfig {
        UnsplashConfig {
            client_id: Some("key123".to_string()),
            orientation: Some("portrait".to_string()),
            query: Some("mountains".to_string()),
            ..UnsplashConfig::default()
        }
    }

    #[test]
    fn test_parses_array_response() {
        let json = r#"[{"id":"x","urls":{"raw":"r","thumb":"https://img/thumb1"}},
                       {"id":"y","urls":{"thumb":"https://img/thumb2"}}]"#;
        let photos: RandomPhotos = serde_json::from_str(json).unwrap();
        assert_eq!(photos.first_thumb().as_deref(), Some("https://img/thumb1"));
    }

    #[test]
    fn test_parses_single_object_response() {
        let json = r#"{"id":"x","urls":{"thumb":"https://img/only"}}"#;
        let photos: RandomPhotos = serde_json::from_str(json).unwrap();
        assert_eq!(photos.first_thumb().as_deref(), Some("https://img/only"));
    }

    #[test]
    fn test_empty_array_has_no_thumb() {
        let photos: RandomPhotos = serde_json::from_str("[]").unwrap();
        assert!(photos.first_thumb().is_none());
    }

    #[test]
    fn test_search_request_carries_parameters() {
        let fetcher = CoverFetcher::new(config()).unwrap();
        let request = fetcher.search_request().unwrap();
        let pairs: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(request.url().path(), "/photos/random");
        assert!(pairs.contains(&("client_id".to_string(), "key123".to_string())));
        assert!(pairs.contains(&("count".to_string(), "1".to_string())));
        assert!(pairs.contains(&("orientation".to_string(), "portrait".to_string())));
        assert!(pairs.contains(&("query".to_string(), "mountains".to_string())));
    }

    #[test]
    fn test_missing_client_id_is_config_error() {
        let result = CoverFetcher::new(UnsplashConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_existing_cover_skips_network() {
        let dir = tempdir().unwrap();
        let cover = dir.path().join("cover.jpg");
        std::fs::write(&cover, [0xFF, 0xD8]).unwrap();

        assert!(ensure_cover(&UnsplashConfig::default(), &cover).await);
    }

    #[tokio::test]
    async fn test_failed_download_is_not_fatal() {
        let dir = tempdir().unwrap();
        let cover = dir.path().join("res/images/cover.jpg");
        let config = UnsplashConfig {
            api_url: "http://127.0.0.1:9/photos/random".to_string(),
            timeout_secs: 5,
            ..config()
        };

        assert!(!ensure_cover(&config, &cover).await);
        assert!(!cover.exists());
    }
}
