use reqwest::StatusCode;
use thiserror::Error;

/// Why a single listing page contributed no rows.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for page {page} failed: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("page {page} returned HTTP {status}")]
    Status { page: u32, status: StatusCode },

    #[error("page {page} could not be decoded: {reason}")]
    Decode { page: u32, reason: String },
}
