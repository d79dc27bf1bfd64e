//! Record service client
//!
//! `GET {base}/{records_path}` lists every record, `PUT {base}/{records_path}/{id}`
//! with `{"exported":true}` flags one. No retries: the caller decides what a
//! failure means.

use lakepub_core::{ExportError, HttpError, HttpSettings, SHARED_RUNTIME, build_client};
use reqwest::Url;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LINK};

use crate::record::{Record, decode_records};

/// Default upper bound on followed `rel="next"` links
pub const MAX_PAGES: usize = 1000;

const MARK_BODY: &str = r#"{"exported":true}"#;

/// Result of one flag update. Never an error: the run records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    Failed(String),
}

impl MarkOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, Self::Marked)
    }
}

/// Where records come from and where export flags go.
pub trait RecordSource: Sync {
    /// Every record the service holds, pages aggregated
    fn list_all(&self) -> Result<Vec<Record>, ExportError>;

    /// Set `exported = true` on one record
    fn mark_exported(&self, id: &str) -> MarkOutcome;
}

/// HTTP implementation of [`RecordSource`]
#[derive(Debug, Clone)]
pub struct HttpRecordClient {
    client: reqwest::Client,
    collection_url: Url,
    max_pages: usize,
}

impl HttpRecordClient {
    pub fn new(
        base_url: &str,
        records_path: &str,
        credential: Option<&str>,
        settings: &HttpSettings,
    ) -> Result<Self, HttpError> {
        let mut collection_url = Url::parse(base_url)
            .map_err(|e| HttpError::other(format!("invalid base URL {base_url:?}: {e}")))?;
        collection_url
            .path_segments_mut()
            .map_err(|()| HttpError::other(format!("base URL cannot carry a path: {base_url}")))?
            .pop_if_empty()
            .extend(records_path.split('/').filter(|s| !s.is_empty()));

        Ok(Self {
            client: build_client(settings, credential)?,
            collection_url,
            max_pages: MAX_PAGES,
        })
    }

    /// Stop paging after `max_pages` pages (at least one)
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn collection_url(&self) -> &Url {
        &self.collection_url
    }

    /// Item URL; the id is percent-encoded as one path segment
    pub fn record_url(&self, id: &str) -> Url {
        let mut url = self.collection_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(id);
        }
        url
    }

    fn get_page(&self, url: Url) -> Result<(Vec<u8>, Option<String>), HttpError> {
        SHARED_RUNTIME.handle().block_on(async {
            let resp = self
                .client
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(HttpError::from_reqwest)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(HttpError::status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unexpected status"),
                ));
            }
            let link = resp
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = resp.bytes().await.map_err(HttpError::from_reqwest)?;
            Ok((body.to_vec(), link))
        })
    }
}

impl RecordSource for HttpRecordClient {
    fn list_all(&self) -> Result<Vec<Record>, ExportError> {
        let mut records = Vec::new();
        let mut next = Some(self.collection_url.clone());
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > self.max_pages {
                return Err(
                    HttpError::other(format!("gave up after {} pages", self.max_pages)).into(),
                );
            }
            let (body, link) = self.get_page(url.clone())?;
            let page = decode_records(&body).map_err(|e| ExportError::Decode(e.to_string()))?;
            log::debug!("Page {pages}: {} records", page.len());
            records.extend(page);
            next = link
                .as_deref()
                .and_then(next_link)
                .and_then(|target| url.join(target).ok());
        }
        Ok(records)
    }

    fn mark_exported(&self, id: &str) -> MarkOutcome {
        let url = self.record_url(id);
        let result: Result<(), HttpError> = SHARED_RUNTIME.handle().block_on(async {
            let resp = self
                .client
                .put(url)
                .header(CONTENT_TYPE, "application/json")
                .body(MARK_BODY)
                .send()
                .await
                .map_err(HttpError::from_reqwest)?;
            let status = resp.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(HttpError::status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unexpected status"),
                ))
            }
        });
        match result {
            Ok(()) => MarkOutcome::Marked,
            Err(e) => MarkOutcome::Failed(e.to_string()),
        }
    }
}

/// Target of the `rel="next"` entry of an RFC 8288 `Link` header
fn next_link(header: &str) -> Option<&str> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        params
            .split(';')
            .filter_map(|p| p.trim().split_once('='))
            .any(|(k, v)| {
                k.trim().eq_ignore_ascii_case("rel")
                    && v.trim()
                        .trim_matches('"')
                        .split_whitespace()
                        .any(|rel| rel.eq_ignore_ascii_case("next"))
            })
            .then_some(target)
    })
}
