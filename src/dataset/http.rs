//! Grid documents served over HTTP(S)
//!
//! The document is fetched once when the source is opened. Subsetting,
//! materialization and merging then happen locally through [`GridHandle`].

use super::{DatasetError, DatasetHandle, DatasetResult, DatasetSource, GridDataset, GridHandle};
use crate::Credential;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Timeout for the whole document download
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens a grid document from an HTTP endpoint, optionally with basic auth
pub struct HttpSource {
    client: Client,
    url: String,
    credential: Option<Credential>,
}

impl HttpSource {
    /// Create a source for `url`
    ///
    /// # Errors
    /// Returns [`DatasetError::Transport`] if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, credential: Option<Credential>) -> DatasetResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("grid-extract/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DatasetError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            credential,
        })
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("url", &self.url)
            .field("credential", &self.credential)
            .finish()
    }
}

#[async_trait]
impl DatasetSource for HttpSource {
    async fn open(&self) -> DatasetResult<Box<dyn DatasetHandle>> {
        let mut request = self.client.get(&self.url);
        if let Some(credential) = &self.credential {
            request = request.basic_auth(&credential.user, Some(&credential.password));
        }

        debug!(url = %self.url, authenticated = self.credential.is_some(), "Requesting dataset");

        let response = request
            .send()
            .await
            .map_err(|e| DatasetError::Transport(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        let response = response
            .error_for_status()
            .map_err(|e| DatasetError::Transport(format!("{} returned {status}: {e}", self.url)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| DatasetError::Transport(format!("failed to read body from {}: {e}", self.url)))?;
        let dataset = GridDataset::from_slice(&body)?;

        info!(
            url = %self.url,
            bytes = body.len(),
            dimensions = dataset.dimensions.len(),
            "Opened remote dataset"
        );
        Ok(Box::new(GridHandle::new(self.describe(), dataset)))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
