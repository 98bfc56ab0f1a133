// src/fetch/zips.rs
use reqwest::Client;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{fs, time::sleep};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::{EndpointTemplate, FetchError, Fetcher, ResourceHandle, RetryDecision, RetryPolicy};
use crate::codes::ZipCode;
use crate::config::{Config, HttpConfig};

/// Build the shared HTTP client. One client is reused for every request so
/// connections are pooled, including across concurrent fetches.
pub fn build_client(http: &HttpConfig) -> reqwest::Result<Client> {
    if http.accept_invalid_certs {
        // the zone file host has served certificate chains that fail verification
        warn!("TLS certificate verification is disabled");
    }
    Client::builder()
        .danger_accept_invalid_certs(http.accept_invalid_certs)
        .timeout(Duration::from_secs(http.request_timeout_secs))
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .build()
}

/// Downloads zone files from the templated endpoint into `output_dir`,
/// one `<prefix>.<extension>` file per lookup key.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoint: EndpointTemplate,
    output_dir: PathBuf,
    extension: String,
    retry: RetryPolicy,
}

impl HttpFetcher {
    /// Creates `output_dir` if it does not exist.
    pub fn new(
        client: Client,
        endpoint: EndpointTemplate,
        output_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        retry: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|source| FetchError::Storage {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            client,
            endpoint,
            output_dir,
            extension: extension.into(),
            retry,
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let client = build_client(&cfg.http)?;
        Ok(Self::new(
            client,
            cfg.endpoint_template.clone(),
            &cfg.output_dir,
            &cfg.file_extension,
            cfg.http.retry_policy(),
        )?)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(format!("{}.{}", prefix, self.extension))
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let network = |source| FetchError::Network {
            url: url.clone(),
            source,
        };
        let resp = self.client.get(url.clone()).send().await.map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.clone(),
                status,
            });
        }
        let body = resp.bytes().await.map_err(network)?;
        Ok(body.to_vec())
    }

    async fn get_with_retry(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut retry = 0;
        loop {
            match self.get_bytes(url).await {
                Ok(body) => return Ok(body),
                Err(e) => match self.retry.decide(retry + 1, &e) {
                    RetryDecision::RetryAfter(delay) => {
                        retry += 1;
                        warn!(%url, retry, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                        sleep(delay).await;
                    }
                    RetryDecision::NoRetry => {
                        if retry > 0 {
                            error!(%url, retries = retry, error = %e, "giving up");
                        }
                        return Err(e);
                    }
                },
            }
        }
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self, code), fields(code = %code))]
    async fn fetch(&self, code: &ZipCode) -> Result<ResourceHandle, FetchError> {
        let prefix = code.prefix();
        let rendered = self
            .endpoint
            .render(&prefix)
            .map_err(|source| FetchError::InvalidUrl {
                url: self.endpoint.to_string(),
                source,
            })?;

        debug!(url = %rendered, "downloading");
        let body = self.get_with_retry(&rendered).await?;

        let path = self.path_for(&prefix);
        fs::write(&path, &body)
            .await
            .map_err(|source| FetchError::Storage {
                path: path.clone(),
                source,
            })?;
        info!(prefix = %prefix, bytes = body.len(), path = %path.display(), "saved zone file");

        Ok(ResourceHandle { prefix, path })
    }
}
