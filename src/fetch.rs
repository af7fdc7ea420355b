//! Fetch ingest mode: each decoded frame is a URL, the reply is its body.
//!
//! The outbound GET sits on the per-connection critical path, so it carries
//! two bounds: the reqwest client's own timeout and an outer
//! `tokio::time::timeout` that drops the request future regardless of what
//! the client is doing. Every failure becomes an `Error fetching URL: ...`
//! reply; the connection is never closed because a fetch failed.

use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Invalid URL, received '{0}'")]
    InvalidUrl(String),
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend fails to initialize.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, timeout })
    }

    /// GET `raw` (after sanitizing) and return the response body text.
    ///
    /// # Errors
    ///
    /// Invalid URL, transport failure, or the hard timeout elapsing.
    pub async fn fetch(&self, raw: &str) -> Result<String, FetchError> {
        let url = sanitize_url(raw);
        if !has_http_scheme(&url) {
            return Err(FetchError::InvalidUrl(url));
        }

        let request = async {
            let res = self.client.get(&url).send().await?;
            let status = res.status();
            let body = res.text().await?;
            Ok::<_, FetchError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        info!(%url, status = status.as_u16(), bytes = body.len(), "fetch: completed");
        Ok(body)
    }

    /// Reply plaintext for one decoded frame: the fetched body, or an error
    /// message in its place.
    pub async fn respond(&self, plaintext: &[u8]) -> String {
        let raw = String::from_utf8_lossy(plaintext).replace('\0', "");
        match self.fetch(raw.trim()).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "fetch: failed");
                format!("Error fetching URL: {e}")
            }
        }
    }
}

// =============================================================================
// URL SANITIZING
// =============================================================================

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}' | '\u{200B}'..='\u{200F}' | '\u{FEFF}')
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Length of the scheme-plus-colon prefix when `url` starts with `http:` or
/// `https:` (any case).
fn scheme_len(url: &str) -> Option<usize> {
    let lower = url.get(..6).unwrap_or(url).to_ascii_lowercase();
    if lower.starts_with("https:") {
        Some(6)
    } else if lower.starts_with("http:") {
        Some(5)
    } else {
        None
    }
}

/// `host.tld...` with a letters-only TLD of at least two characters.
fn looks_like_host(url: &str) -> bool {
    let head: Vec<char> = url
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect();
    (1..head.len()).any(|i| {
        head[i] == '.' && head.get(i + 1..i + 3).is_some_and(|tld| tld.iter().all(char::is_ascii_alphabetic))
    })
}

/// Clean up a user-typed URL: strip control and zero-width characters,
/// repair `http:host` to `http://host`, and default bare hosts to https.
#[must_use]
pub fn sanitize_url(raw: &str) -> String {
    let mut url: String = raw.chars().filter(|c| !is_invisible(*c)).collect::<String>().trim().to_owned();

    if let Some(len) = scheme_len(&url) {
        if !url[len..].starts_with('/') && url.len() > len {
            url.insert_str(len, "//");
        }
    }
    if !has_http_scheme(&url) && looks_like_host(&url) {
        url.insert_str(0, "https://");
    }
    url
}

#[cfg(test)]
#[path = "fetch_test.rs"]
mod tests;
