//! Classification of a completed attempt.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::decode::{shape_body, snapshot};
use crate::error::is_retryable_transport;
use crate::{DownloadContent, RequestConfig, RequestError, Response};

/// Result of one attempt; never both retryable and fatal.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Response),
    RetryableFailure(RequestError),
    FatalFailure(RequestError),
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::RetryableFailure(_) => "retryable",
            Self::FatalFailure(_) => "fatal",
        }
    }
}

/// Response as read off the wire, before any policy is applied.
#[derive(Debug)]
pub(crate) struct RawAttempt {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Applies the status policy, shapes the body, then runs the content strategy.
///
/// A content strategy that asks for a retry wins over the status policy, so
/// a rejected status outside the retryable set is still retried when the
/// strategy flags its body.
pub(crate) fn evaluate_response(
    raw: RawAttempt,
    config: &RequestConfig,
    mode: DownloadContent,
) -> AttemptOutcome {
    let retryer = &config.retryer;

    if !config.is_acceptable(raw.status) {
        let content_rejected = !retryer.is_retryable_status(raw.status)
            && retryer.has_content_strategy()
            && shape_body(raw.body.clone(), mode)
                .is_ok_and(|content| retryer.content_requests_retry(&content));
        let err = RequestError::ResponseEvaluation {
            status: raw.status,
            body: snapshot(&raw.body),
            content_rejected,
        };
        return if content_rejected || retryer.is_retryable_status(raw.status) {
            AttemptOutcome::RetryableFailure(err)
        } else {
            AttemptOutcome::FatalFailure(err)
        };
    }

    let body_snapshot = retryer.has_content_strategy().then(|| snapshot(&raw.body));
    let content = match shape_body(raw.body, mode) {
        Ok(content) => content,
        Err(err) => return AttemptOutcome::FatalFailure(err),
    };

    if retryer.content_requests_retry(&content) {
        return AttemptOutcome::RetryableFailure(RequestError::ResponseEvaluation {
            status: raw.status,
            body: body_snapshot.unwrap_or_default(),
            content_rejected: true,
        });
    }

    AttemptOutcome::Success(Response {
        url: raw.url,
        status: raw.status,
        headers: raw.headers,
        content,
        attempts: 0,
        elapsed: Duration::ZERO,
    })
}

/// Classifies an error raised by the transport before a response arrived.
pub(crate) fn evaluate_transport_error(
    err: reqwest::Error,
    config: &RequestConfig,
) -> AttemptOutcome {
    if err.is_timeout() {
        return AttemptOutcome::RetryableFailure(RequestError::Timeout {
            timeout: config.timeout,
        });
    }
    if config.retryer.retries_transport() && is_retryable_transport(&err) {
        AttemptOutcome::RetryableFailure(RequestError::Transport(err))
    } else {
        AttemptOutcome::FatalFailure(RequestError::Transport(err))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use reqwest::header::HeaderMap;
    use serde_json::json;

    use super::{evaluate_response, AttemptOutcome, RawAttempt};
    use crate::{Content, DownloadContent, RequestConfig, RequestError, Retryer};

    fn raw(status: u16, body: &'static str) -> RawAttempt {
        RawAttempt {
            url: "http://test/item".to_owned(),
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn error_code_strategy() -> Retryer {
        Retryer::default().with_content_retry(|content: &Content| {
            content
                .as_json()
                .and_then(|body| body.get("error_code"))
                .is_some()
        })
    }

    #[test]
    fn rejected_status_is_retryable_by_default() {
        let config = RequestConfig::default();
        let outcome = evaluate_response(raw(500, "boom"), &config, DownloadContent::Text);
        match outcome {
            AttemptOutcome::RetryableFailure(RequestError::ResponseEvaluation {
                status,
                body,
                content_rejected,
            }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
                assert!(!content_rejected);
            }
            other => panic!("expected retryable evaluation failure, got {other:?}"),
        }
    }

    #[test]
    fn status_outside_retryable_set_is_fatal() {
        let config = RequestConfig::default()
            .with_retryer(Retryer::default().with_retryable_status_codes([503]));
        let outcome = evaluate_response(raw(404, "missing"), &config, DownloadContent::Text);
        assert!(matches!(outcome, AttemptOutcome::FatalFailure(_)));
    }

    #[test]
    fn content_strategy_retries_successful_status() {
        let config = RequestConfig::default().with_retryer(error_code_strategy());
        let outcome = evaluate_response(
            raw(200, r#"{"error_code": 17}"#),
            &config,
            DownloadContent::Json,
        );
        match outcome {
            AttemptOutcome::RetryableFailure(RequestError::ResponseEvaluation {
                status,
                content_rejected,
                ..
            }) => {
                assert_eq!(status, 200);
                assert!(content_rejected);
            }
            other => panic!("expected content rejection, got {other:?}"),
        }
    }

    #[test]
    fn content_strategy_false_succeeds() {
        let config = RequestConfig::default().with_retryer(error_code_strategy());
        let outcome = evaluate_response(raw(200, r#"{"id": "0"}"#), &config, DownloadContent::Json);
        match outcome {
            AttemptOutcome::Success(response) => {
                assert_eq!(response.content, Content::Json(json!({"id": "0"})));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_fatal_decode_error() {
        let config = RequestConfig::default();
        let outcome = evaluate_response(raw(200, "<html>"), &config, DownloadContent::Json);
        assert!(matches!(
            outcome,
            AttemptOutcome::FatalFailure(RequestError::Decode(_))
        ));
    }

    #[test]
    fn no_download_drops_body() {
        let config = RequestConfig::default();
        let outcome = evaluate_response(raw(204, ""), &config, DownloadContent::None);
        match outcome {
            AttemptOutcome::Success(response) => assert!(response.content.is_empty()),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn content_strategy_overrides_fatal_status() {
        let config = RequestConfig::default()
            .with_retryer(error_code_strategy().with_retryable_status_codes([503]));
        let outcome = evaluate_response(
            raw(409, r#"{"error_code": 3}"#),
            &config,
            DownloadContent::Json,
        );
        match outcome {
            AttemptOutcome::RetryableFailure(RequestError::ResponseEvaluation {
                status,
                content_rejected,
                ..
            }) => {
                assert_eq!(status, 409);
                assert!(content_rejected);
            }
            other => panic!("expected content rejection, got {other:?}"),
        }

        let outcome = evaluate_response(raw(409, r#"{"id": "0"}"#), &config, DownloadContent::Json);
        assert!(matches!(outcome, AttemptOutcome::FatalFailure(_)));
    }
}
