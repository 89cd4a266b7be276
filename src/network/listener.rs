//! Process-wide HTTP exchange listener and the client that feeds it
//!
//! [`HttpListener`] fans published exchanges out to every subscriber while at
//! least one caller has started it. [`RecordingClient`] wraps a reqwest client and
//! publishes each completed request/response pair to its listener.

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Client, Request, StatusCode};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::data::{HttpExchange, RequestLogEntry, RequestRecord, ResponseRecord};

use super::source::{NetworkEventSource, Subscription};

/// Listener shared by the whole process
static GLOBAL_LISTENER: OnceLock<HttpListener> = OnceLock::new();

#[derive(Default)]
struct ListenerState {
    /// Outstanding start() calls; the listener publishes while this is non-zero
    starts: usize,
    next_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<RequestLogEntry>)>,
}

/// Fan-out hub for captured HTTP exchanges
#[derive(Clone, Default)]
pub struct HttpListener {
    state: Arc<Mutex<ListenerState>>,
}

impl HttpListener {
    /// Create a standalone listener
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide listener
    pub fn global() -> Self {
        GLOBAL_LISTENER.get_or_init(HttpListener::new).clone()
    }

    /// Whether exchanges are currently being published
    pub fn is_active(&self) -> bool {
        self.state.lock().starts > 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Publish an exchange to all subscribers.
    ///
    /// Returns false when the listener is stopped and the exchange was ignored.
    pub fn publish(&self, exchange: HttpExchange) -> bool {
        let mut state = self.state.lock();
        if state.starts == 0 {
            return false;
        }

        let entry = RequestLogEntry::captured(exchange);
        debug!(
            "Captured {} {} -> {}",
            entry.request.method, entry.request.url, entry.response.status
        );

        // Subscribers whose receiver is gone are dropped here
        state
            .subscribers
            .retain(|(_, tx)| tx.send(entry.clone()).is_ok());
        true
    }
}

impl NetworkEventSource for HttpListener {
    fn start(&self) {
        let mut state = self.state.lock();
        state.starts += 1;
        debug!("HTTP listener started ({} active)", state.starts);
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.starts == 0 {
            warn!("HTTP listener stopped while not started");
            return;
        }
        state.starts -= 1;
        debug!("HTTP listener stopped ({} active)", state.starts);
    }

    fn subscribe(&self, tx: mpsc::UnboundedSender<RequestLogEntry>) -> Subscription {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.push((id, tx));
            id
        };

        let weak: Weak<Mutex<ListenerState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().subscribers.retain(|(sub_id, _)| *sub_id != id);
            }
        })
    }
}

/// Response returned by [`RecordingClient`] once its body has been read
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// reqwest client that reports every exchange to an [`HttpListener`]
#[derive(Clone)]
pub struct RecordingClient {
    client: Client,
    listener: HttpListener,
}

impl RecordingClient {
    pub fn new(listener: HttpListener) -> Self {
        Self::with_client(Client::new(), listener)
    }

    pub fn with_client(client: Client, listener: HttpListener) -> Self {
        Self { client, listener }
    }

    /// Underlying client, for building requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a GET request
    pub async fn get(&self, url: &str) -> reqwest::Result<CapturedResponse> {
        let request = self.client.get(url).build()?;
        self.execute(request).await
    }

    /// Execute a request and publish the resulting exchange.
    ///
    /// Requests that fail before a response arrives are not published.
    pub async fn execute(&self, request: Request) -> reqwest::Result<CapturedResponse> {
        let request_record = RequestRecord {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: header_map(request.headers()),
            body: request
                .body()
                .and_then(|body| body.as_bytes())
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        };

        let response = self.client.execute(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        self.listener.publish(HttpExchange {
            request: request_record,
            response: ResponseRecord {
                status: status.as_u16(),
                headers: header_map(&headers),
                body: (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned()),
            },
        });

        Ok(CapturedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Flatten a header map, joining repeated headers with ", "
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}
