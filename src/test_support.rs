//! In-crate fakes for the network seams.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;
use url::Url;

use crate::api::{ApiError, ContentSource};
use crate::download::{DownloadError, Transport, TransportResponse};
use crate::model::{DiscussionPage, Section};

/// Tracks how many calls are in flight and the highest value seen.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

// ==================== Content Source ====================

/// Content source serving fixed JSON fixtures.
#[derive(Debug)]
pub(crate) struct FakeSource {
    site_url: Url,
    contents: HashMap<u64, Value>,
    forums: HashMap<u64, Value>,
    latency: Duration,
    in_flight: InFlight,
    forum_calls: AtomicUsize,
    forum_requests: Mutex<Vec<(u64, u32, u32)>>,
}

impl FakeSource {
    pub(crate) fn new() -> Self {
        Self {
            site_url: Url::parse("https://cms.test").unwrap(),
            contents: HashMap::new(),
            forums: HashMap::new(),
            latency: Duration::ZERO,
            in_flight: InFlight::default(),
            forum_calls: AtomicUsize::new(0),
            forum_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_contents(mut self, course_id: u64, sections: Value) -> Self {
        self.contents.insert(course_id, sections);
        self
    }

    pub(crate) fn with_forum(mut self, forum_id: u64, page: Value) -> Self {
        self.forums.insert(forum_id, page);
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    pub(crate) fn forum_calls(&self) -> usize {
        self.forum_calls.load(Ordering::SeqCst)
    }

    /// `(forum_id, page, per_page)` of every forum request, in call order.
    pub(crate) fn forum_requests(&self) -> Vec<(u64, u32, u32)> {
        self.forum_requests.lock().unwrap().clone()
    }

    async fn serve(&self, fixture: Option<&Value>, function: &str) -> Result<Value, ApiError> {
        self.in_flight.enter();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.exit();
        fixture
            .cloned()
            .ok_or_else(|| ApiError::remote(function, "invalidrecord", "no fixture"))
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn site_url(&self) -> &Url {
        &self.site_url
    }

    fn authorize_url(&self, file_url: &str) -> String {
        match Url::parse(file_url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", "t0k3n");
                url.to_string()
            }
            Err(_) => file_url.to_string(),
        }
    }

    async fn course_contents(&self, course_id: u64) -> Result<Vec<Section>, ApiError> {
        let value = self
            .serve(self.contents.get(&course_id), "core_course_get_contents")
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::decode("core_course_get_contents", e))
    }

    async fn forum_discussions(
        &self,
        forum_id: u64,
        page: u32,
        per_page: u32,
    ) -> Result<DiscussionPage, ApiError> {
        self.forum_calls.fetch_add(1, Ordering::SeqCst);
        self.forum_requests
            .lock()
            .unwrap()
            .push((forum_id, page, per_page));
        let function = "mod_forum_get_forum_discussions_paginated";
        let value = self.serve(self.forums.get(&forum_id), function).await?;
        serde_json::from_value(value).map_err(|e| ApiError::decode(function, e))
    }
}

// ==================== Transport ====================

/// One scripted answer of [`FakeTransport`].
#[derive(Debug, Clone)]
pub(crate) enum FakeReply {
    /// 200 with a body.
    Body {
        data: Vec<u8>,
        content_disposition: Option<String>,
    },
    /// Non-success status.
    Status(u16),
    /// Request timed out.
    Timeout,
    /// 200 whose body fails after yielding the given bytes.
    BrokenBody(Vec<u8>),
}

impl FakeReply {
    pub(crate) fn body(data: &[u8]) -> Self {
        Self::Body {
            data: data.to_vec(),
            content_disposition: None,
        }
    }

    pub(crate) fn with_disposition(self, header: &str) -> Self {
        match self {
            Self::Body { data, .. } => Self::Body {
                data,
                content_disposition: Some(header.to_string()),
            },
            other => other,
        }
    }
}

/// Transport answering from per-URL scripts.
///
/// Each request consumes the next reply of its URL's script; the last reply
/// repeats once the script is exhausted. Unknown URLs answer 404.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    scripts: Mutex<HashMap<String, Vec<FakeReply>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: InFlight,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn script(&self, url: &str, replies: Vec<FakeReply>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(url.to_string(), replies);
        }
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(url).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    fn next_reply(&self, url: &str) -> FakeReply {
        let index = {
            let Ok(mut calls) = self.calls.lock() else {
                return FakeReply::Status(500);
            };
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let Ok(scripts) = self.scripts.lock() else {
            return FakeReply::Status(500);
        };
        match scripts.get(url) {
            Some(replies) if !replies.is_empty() => {
                replies[index.min(replies.len() - 1)].clone()
            }
            _ => FakeReply::Status(404),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, DownloadError> {
        self.in_flight.enter();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.exit();

        match self.next_reply(url) {
            FakeReply::Body {
                data,
                content_disposition,
            } => Ok(TransportResponse {
                content_length: Some(data.len() as u64),
                content_disposition,
                body: stream::iter(vec![Ok(Bytes::from(data))]).boxed(),
            }),
            FakeReply::Status(status) => Err(DownloadError::http_status(url, status)),
            FakeReply::Timeout => Err(DownloadError::timeout(url)),
            FakeReply::BrokenBody(partial) => {
                let failure = DownloadError::timeout(url);
                Ok(TransportResponse {
                    content_length: None,
                    content_disposition: None,
                    body: stream::iter(vec![Ok(Bytes::from(partial)), Err(failure)]).boxed(),
                })
            }
        }
    }
}
