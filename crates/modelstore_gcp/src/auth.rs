//! OAuth access tokens for the Google REST APIs.
//!
//! Resolution order: a configured token, then `GOOGLE_OAUTH_ACCESS_TOKEN`,
//! then the instance metadata server. Metadata-server tokens are cached
//! until shortly before they expire.

use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{GcpError, Result};

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the server-reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

enum TokenSource {
    Fixed(String),
    MetadataServer { url: String, http: Client },
}

pub struct TokenProvider {
    source: TokenSource,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Configured token, else the environment, else the metadata server.
    pub fn resolve(configured: Option<String>) -> Result<Self> {
        let configured = configured.filter(|t| !t.trim().is_empty());
        if let Some(token) = configured {
            info!("Using configured access token");
            return Ok(Self::fixed(token));
        }
        if let Some(token) = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
        {
            info!("Using access token from {}", ACCESS_TOKEN_ENV);
            return Ok(Self::fixed(token));
        }
        info!("Using metadata server for access tokens");
        Self::metadata_server(METADATA_TOKEN_URL)
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Fixed(token.into()),
            cached: Mutex::new(None),
        }
    }

    pub fn metadata_server(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|source| GcpError::Http {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            source: TokenSource::MetadataServer { url, http },
            cached: Mutex::new(None),
        })
    }

    pub fn describe_source(&self) -> &'static str {
        match self.source {
            TokenSource::Fixed(_) => "fixed",
            TokenSource::MetadataServer { .. } => "metadata-server",
        }
    }

    pub fn access_token(&self) -> Result<String> {
        let (url, http) = match &self.source {
            TokenSource::Fixed(token) => return Ok(token.clone()),
            TokenSource::MetadataServer { url, http } => (url, http),
        };

        let mut cached = self
            .cached
            .lock()
            .map_err(|_| GcpError::Auth("token cache lock poisoned".to_string()))?;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.refresh_at {
                return Ok(entry.token.clone());
            }
        }

        debug!("Fetching access token from {}", url);
        let response = http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .map_err(|source| GcpError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GcpError::Auth(format!(
                "metadata server returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        let token: MetadataToken = response.json().map_err(|source| GcpError::Http {
            url: url.clone(),
            source,
        })?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("source", &self.describe_source())
            .finish()
    }
}
