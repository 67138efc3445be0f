use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::{decode, Result};

/// Body captured from a response, shaped by the configured download mode.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Content {
    /// Body was not downloaded.
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl Content {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Decodes the body into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        decode::decode_content(self)
    }

    /// JSON view of the body, used for poll diagnostics.
    pub(crate) fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Json(value) => Some(value.clone()),
            Self::Text(text) => serde_json::from_str(text).ok(),
            Self::Bytes(bytes) => serde_json::from_slice(bytes).ok(),
            Self::Empty => None,
        }
    }
}

/// Final response of one top-level call.
#[derive(Clone, Debug)]
pub struct Response {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub content: Content,
    /// Number of transport attempts it took, starting at 1.
    pub attempts: u32,
    /// Wall-clock time from the first attempt to completion, backoff included.
    pub elapsed: Duration,
}

/// Response whose body was decoded into `T`.
#[derive(Clone, Debug)]
pub struct StructuredResponse<T> {
    pub response: Response,
    pub data: T,
}

impl<T> StructuredResponse<T> {
    pub fn into_data(self) -> T {
        self.data
    }
}
