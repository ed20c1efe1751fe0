//! Movie Catalog
//!
//! Thin consumer of the server's movie listing: which videos exist and
//! where their files live. The convergence core only ever sees video ids;
//! this maps them to playable source locators for whatever mounts the
//! player.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One entry in the movie listing. File fields are paths relative to the
/// server's file root.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Movie {
    pub id: String,
    pub title: String,
    pub video: String,
    pub subtitles: String,
    pub thumbnail: String,
}

/// Fetches the listing and maps ids to fetchable URLs.
#[derive(Debug, Clone)]
pub struct MovieCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl MovieCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the listing, keyed by video id.
    pub async fn fetch(&self) -> Result<HashMap<String, Movie>, CatalogError> {
        let url = format!("{}/files/movies.json", self.base_url);
        let movies: HashMap<String, Movie> =
            self.http.get(&url).send().await?.json().await?;
        debug!("Loaded {} movies from catalog", movies.len());
        Ok(movies)
    }

    /// Playable source locator for a movie.
    pub fn source_url(&self, movie: &Movie) -> String {
        self.file_url(&movie.video)
    }

    pub fn subtitle_url(&self, movie: &Movie) -> String {
        self.file_url(&movie.subtitles)
    }

    pub fn thumbnail_url(&self, movie: &Movie) -> String {
        self.file_url(&movie.thumbnail)
    }

    fn file_url(&self, path: &str) -> String {
        format!("{}/files/{}", self.base_url, path)
    }
}
