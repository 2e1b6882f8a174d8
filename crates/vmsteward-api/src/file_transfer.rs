// Guest file download client
//
// The guest file manager does not hand back file contents. It stages the
// file on the host's web server and returns a one-time URL which has to
// be fetched with a plain HTTP GET.

use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Result of fetching a staged guest file.
///
/// Non-2xx statuses are returned rather than raised so callers can attach
/// the status and reason to their own diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl FetchedFile {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// HTTP client for one-time guest file transfer URLs.
#[derive(Debug, Clone)]
pub struct FileTransferClient {
    http: reqwest::Client,
}

impl FileTransferClient {
    /// Build a client from a `TransportConfig`.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// GET the staged file and return its status and body text.
    pub async fn fetch(&self, url: Url) -> Result<FetchedFile, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let reason = status.canonical_reason().unwrap_or("").to_owned();
        let body = resp.text().await.map_err(Error::Transport)?;

        Ok(FetchedFile {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}
