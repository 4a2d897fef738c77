//! In-memory [`HttpClient`] that replays scripted responses.
//!
//! Each URL has a queue of one-shot replies and an optional sticky reply
//! used once the queue is drained. Unknown URLs answer 404. Every request
//! is counted so callers can assert exactly how much traffic a scenario
//! produced.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{HttpClient, HttpResponse};
use crate::FetchError;

/// A canned reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Respond(HttpResponse),
    ConnectionError,
}

impl ScriptedReply {
    #[must_use]
    pub const fn bytes(body: Vec<u8>) -> Self {
        Self::Respond(HttpResponse {
            status: 200,
            retry_after: None,
            body,
        })
    }

    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::bytes(value.to_string().into_bytes())
    }

    #[must_use]
    pub fn html(text: &str) -> Self {
        Self::bytes(text.as_bytes().to_vec())
    }

    #[must_use]
    pub const fn status(status: u16) -> Self {
        Self::Respond(HttpResponse {
            status,
            retry_after: None,
            body: Vec::new(),
        })
    }

    #[must_use]
    pub fn throttled(retry_after: Option<&str>) -> Self {
        Self::Respond(HttpResponse {
            status: 429,
            retry_after: retry_after.map(ToOwned::to_owned),
            body: Vec::new(),
        })
    }

    #[must_use]
    pub const fn connection_error() -> Self {
        Self::ConnectionError
    }
}

#[derive(Debug, Default)]
struct Route {
    queued: VecDeque<ScriptedReply>,
    sticky: Option<ScriptedReply>,
    hits: usize,
}

/// Scripted stand-in for the network.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    routes: Mutex<BTreeMap<String, Route>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every response for `latency` before returning it.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn with_route<T>(&self, url: &str, f: impl FnOnce(&mut Route) -> T) -> T {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        f(routes.entry(url.to_owned()).or_default())
    }

    /// Queues a one-shot reply for `url`.
    pub fn push(&self, url: &str, reply: ScriptedReply) {
        self.with_route(url, |route| route.queued.push_back(reply));
    }

    /// Sets the reply used for `url` once its queue is empty.
    pub fn always(&self, url: &str, reply: ScriptedReply) {
        self.with_route(url, |route| route.sticky = Some(reply));
    }

    /// Requests made to `url` so far.
    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .map_or(0, |route| route.hits)
    }

    /// Requests made to any URL so far.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|route| route.hits)
            .sum()
    }

    /// Highest number of requests observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = self.with_route(url, |route| {
            route.hits += 1;
            route
                .queued
                .pop_front()
                .or_else(|| route.sticky.clone())
                .unwrap_or_else(|| ScriptedReply::status(404))
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            ScriptedReply::Respond(response) => Ok(response),
            ScriptedReply::ConnectionError => Err(FetchError::Connection {
                url: url.to_owned(),
                message: "connection reset by peer".to_owned(),
            }),
        }
    }
}
