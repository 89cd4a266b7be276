//! Captured HTTP exchange data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request half of a captured exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// HTTP method (e.g., "GET")
    pub method: String,

    /// Absolute request URL
    pub url: String,

    /// Request headers, keyed by lowercase header name
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Response half of a captured exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,

    /// Response headers, keyed by lowercase header name
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response body, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// A request/response pair as emitted by a network event source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExchange {
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

impl HttpExchange {
    /// Build an exchange from a method/URL and a response status
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            request: RequestRecord {
                method: method.into(),
                url: url.into(),
                headers: BTreeMap::new(),
                body: None,
            },
            response: ResponseRecord {
                status,
                headers: BTreeMap::new(),
                body: None,
            },
        }
    }

    /// Attach a response body
    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response.body = Some(body.into());
        self
    }
}

/// One captured network exchange, stamped when the source observed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub request: RequestRecord,
    pub response: ResponseRecord,

    /// When the exchange completed
    pub timestamp: DateTime<Utc>,
}

impl RequestLogEntry {
    /// Stamp an exchange with the current time
    pub fn captured(exchange: HttpExchange) -> Self {
        Self::at(exchange, Utc::now())
    }

    /// Stamp an exchange with a given time
    pub fn at(exchange: HttpExchange, timestamp: DateTime<Utc>) -> Self {
        Self {
            request: exchange.request,
            response: exchange.response,
            timestamp,
        }
    }
}
