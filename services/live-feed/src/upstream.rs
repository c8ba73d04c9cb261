//! Upstream observation source
//!
//! [`ObservationSource`] is the seam between the ingestor and the outside
//! world. [`INaturalistSource`] implements it against the iNaturalist v2 API:
//!
//! ```text
//! GET {url}?per_page=150&order=desc&photos=true&fields=...&id_above={cursor}
//! → { "results": [ newest first ... ] }
//! ```

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;
use types::ids::ObservationId;
use types::observation::{ObservationsResponse, RawObservation};

use crate::config::FeedConfig;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.inaturalist.org/v2/observations";

/// Fields requested from the upstream. Normalization does not depend on it.
pub const UPSTREAM_FIELDS: &str = "id,species_guess,geojson,created_at,\
taxon.preferred_common_name,taxon.wikipedia_url,taxon.iconic_taxon_name,photos.url";

const USER_AGENT: &str = concat!("wildlive-live-feed/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("malformed response body: {0}")]
    Body(#[from] serde_json::Error),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can return raw records strictly newer than a cursor.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Records with `id > cursor`, newest first.
    async fn fetch_since(&self, cursor: ObservationId)
        -> Result<Vec<RawObservation>, UpstreamError>;
}

pub struct INaturalistSource {
    http: reqwest::Client,
    url: Url,
    per_page: u32,
}

impl INaturalistSource {
    /// Build the client. An unusable URL is a startup error.
    pub fn new(config: &FeedConfig) -> Result<Self, UpstreamError> {
        let url = Url::parse(&config.upstream_url).map_err(|e| UpstreamError::InvalidUrl {
            url: config.upstream_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidUrl {
                url: config.upstream_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            url,
            per_page: config.per_page,
        })
    }

    /// Full query URL for one poll.
    pub fn request_url(&self, cursor: ObservationId) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("per_page", &self.per_page.to_string())
            .append_pair("order", "desc")
            .append_pair("photos", "true")
            .append_pair("fields", UPSTREAM_FIELDS)
            .append_pair("id_above", &cursor.to_string());
        url
    }
}

#[async_trait]
impl ObservationSource for INaturalistSource {
    async fn fetch_since(
        &self,
        cursor: ObservationId,
    ) -> Result<Vec<RawObservation>, UpstreamError> {
        let url = self.request_url(cursor);
        debug!(url = %url, "Polling upstream");

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            return Err(UpstreamError::Status(res.status()));
        }

        let body = res.bytes().await?;
        let parsed: ObservationsResponse = serde_json::from_slice(&body)?;
        debug!(
            returned = parsed.results.len(),
            total = ?parsed.total_results,
            cursor = %cursor,
            "Upstream page received"
        );
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> INaturalistSource {
        INaturalistSource::new(&FeedConfig::default()).unwrap()
    }

    #[test]
    fn test_request_url_carries_cursor() {
        let url = source().request_url(ObservationId::new(42));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(pairs.contains(&("id_above".to_string(), "42".to_string())));
        assert!(pairs.contains(&("order".to_string(), "desc".to_string())));
        assert!(pairs.contains(&("photos".to_string(), "true".to_string())));
        assert!(pairs.contains(&("per_page".to_string(), "150".to_string())));
        assert!(pairs.contains(&("fields".to_string(), UPSTREAM_FIELDS.to_string())));
    }

    #[test]
    fn test_request_url_does_not_accumulate() {
        let src = source();
        let first = src.request_url(ObservationId::new(1));
        let second = src.request_url(ObservationId::new(2));
        assert_eq!(first.query_pairs().count(), second.query_pairs().count());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = FeedConfig {
            upstream_url: "not a url".to_string(),
            ..FeedConfig::default()
        };
        assert!(matches!(
            INaturalistSource::new(&config),
            Err(UpstreamError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let config = FeedConfig {
            upstream_url: "ftp://example.org/observations".to_string(),
            ..FeedConfig::default()
        };
        assert!(INaturalistSource::new(&config).is_err());
    }
}
