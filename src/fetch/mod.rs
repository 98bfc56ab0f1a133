// src/fetch/mod.rs

use reqwest::StatusCode;
use std::{io, path::PathBuf};
use thiserror::Error;
use url::Url;

use crate::codes::ZipCode;

pub mod retry;
pub mod urls;
pub mod zips;

pub use retry::{RetryDecision, RetryPolicy};
pub use urls::EndpointTemplate;
pub use zips::HttpFetcher;

/// A fetched zone file as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    /// Three-digit lookup key the file was requested with.
    pub prefix: String,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} failed")]
    Network {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned {status}")]
    Status { url: Url, status: StatusCode },
    #[error("invalid request URL {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("writing {path:?}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Connection-level failures (connect errors and timeouts) are the only
    /// ones worth retrying.
    pub fn is_connection(&self) -> bool {
        match self {
            FetchError::Network { source, .. } => source.is_connect() || source.is_timeout(),
            _ => false,
        }
    }
}

/// Retrieves the zone file covering a postal code and stores it.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    async fn fetch(&self, code: &ZipCode) -> Result<ResourceHandle, FetchError>;
}
