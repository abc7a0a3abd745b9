//! Authenticated JSON-over-HTTP plumbing shared by the API clients.

use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::error::{GcpError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PAGE_SIZE: &str = "100";

/// One page of a `list` response.
pub(crate) trait Page: DeserializeOwned {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Clone)]
pub struct RestClient {
    http: Client,
    tokens: Arc<TokenProvider>,
}

impl RestClient {
    pub fn new(tokens: Arc<TokenProvider>) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("modelstore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| GcpError::Http {
                url: String::new(),
                source,
            })?;
        Ok(Self { http, tokens })
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.execute("GET", url, self.http.get(url).query(query))
    }

    pub(crate) fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T> {
        self.execute("POST", url, self.http.post(url).query(query).json(body))
    }

    pub(crate) fn post_bytes<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<T> {
        let request = self
            .http
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.execute("POST", url, request)
    }

    /// Follow `nextPageToken` until the listing is exhausted.
    pub(crate) fn list_all<P: Page>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut page_query: Vec<(&str, String)> = query.to_vec();
            page_query.push(("pageSize", PAGE_SIZE.to_string()));
            if let Some(token) = &page_token {
                page_query.push(("pageToken", token.clone()));
            }

            let page: P = self.get_json(url, &page_query)?;
            let (page_items, next) = page.into_parts();
            items.extend(page_items);
            pages += 1;

            match next.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!("Listed {} items in {} pages from {}", items.len(), pages, url);
        Ok(items)
    }

    fn execute<T: DeserializeOwned>(
        &self,
        method: &'static str,
        url: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let token = self.tokens.access_token()?;
        let response = request
            .bearer_auth(token)
            .send()
            .map_err(|source| GcpError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().map_err(|source| GcpError::Http {
            url: url.to_string(),
            source,
        })?;
        if !status.is_success() {
            return Err(GcpError::Status {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|source| GcpError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// `https://host/` and `https://host` both become `https://host`.
pub(crate) fn trim_base(base: &str) -> &str {
    base.trim_end_matches('/')
}
