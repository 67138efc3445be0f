use bytes::Bytes;
use serde::Serialize;

use crate::{RequestError, Result};

/// Request body; exactly one variant is active.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    /// Raw bytes with an optional `Content-Type`.
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    /// Sent as `application/json`.
    Json(serde_json::Value),
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
}

impl Payload {
    /// Serializes `value` into a JSON payload.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|err| {
                RequestError::InvalidConfig(format!("payload is not serializable: {err}"))
            })
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: None,
        }
    }

    pub fn bytes_with_type(data: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self::Bytes {
            data: data.into(),
            content_type: Some(content_type.into()),
        }
    }

    pub fn form<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Form(
            fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Explicit content type of a byte payload.
    ///
    /// JSON and form payloads get theirs from `reqwest` unless the request
    /// headers already carry one.
    pub(crate) fn content_type(&self) -> Option<&str> {
        match self {
            Self::Bytes {
                content_type: Some(content_type),
                ..
            } => Some(content_type),
            _ => None,
        }
    }

    pub(crate) fn apply(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::Empty => builder,
            Self::Bytes { data, .. } => builder.body(data.clone()),
            Self::Json(value) => builder.json(value),
            Self::Form(fields) => builder.form(fields),
        }
    }
}
