use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{Content, DownloadContent, RequestError};

/// Upper bound for body snapshots carried by errors.
pub(crate) const BODY_SNAPSHOT_LIMIT: usize = 512;

pub(crate) fn shape_body(bytes: Bytes, mode: DownloadContent) -> Result<Content, RequestError> {
    match mode {
        DownloadContent::None => Ok(Content::Empty),
        DownloadContent::Bytes => Ok(Content::Bytes(bytes)),
        DownloadContent::Text => Ok(Content::Text(String::from_utf8_lossy(&bytes).into_owned())),
        DownloadContent::Json => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Content::Json(serde_json::Value::Null));
            }
            serde_json::from_slice(&bytes)
                .map(Content::Json)
                .map_err(|err| {
                    RequestError::Decode(format!(
                        "invalid JSON body: {err}; body: {}",
                        snapshot(&bytes)
                    ))
                })
        }
    }
}

pub(crate) fn decode_content<T: DeserializeOwned>(content: &Content) -> Result<T, RequestError> {
    let decoded = match content {
        Content::Json(value) => T::deserialize(value),
        Content::Text(text) => serde_json::from_str(text),
        Content::Bytes(bytes) => serde_json::from_slice(bytes),
        Content::Empty => {
            return Err(RequestError::Decode(
                "response body was not downloaded".to_owned(),
            ))
        }
    };
    decoded.map_err(|err| {
        RequestError::Decode(format!(
            "response does not match {}: {err}",
            short_type_name::<T>()
        ))
    })
}

/// Lossy, truncated body text for diagnostics.
pub(crate) fn snapshot(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    match text.char_indices().nth(BODY_SNAPSHOT_LIMIT) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.into_owned(),
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
