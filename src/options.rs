use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::{CancelToken, RateLimiter, RequestError, Result, Retryer};

const ENV_PREFIX: &str = "STEADY_HTTP_";

/// How much of a successful response body is downloaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadContent {
    None,
    #[default]
    Text,
    Bytes,
    Json,
}

/// Proxy basic-auth credentials.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Proxy configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProxyConfig {
    /// Proxy address, e.g. `http://proxy.internal:3128`.
    pub url: String,
    pub credentials: Option<ProxyCredentials>,
    /// Extra PEM certificate trusted alongside the default roots.
    pub ssl_cadata: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            ssl_cadata: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_ssl_cadata(mut self, pem: impl Into<String>) -> Self {
        self.ssl_cadata = Some(pem.into());
        self
    }
}

/// Per-call request policy.
///
/// Shared read-only by every attempt and, in batches, by every item.
#[derive(Clone)]
pub struct RequestConfig {
    pub method: Method,
    /// Extra headers; keys are case-insensitive.
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Timeout of a single attempt, body download included.
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    pub tls_verify: bool,
    pub retryer: Retryer,
    pub rate_limiter: Option<RateLimiter>,
    pub download_content: DownloadContent,
    /// Accepted statuses; any 2xx when unset.
    pub acceptable_codes: Option<Vec<u16>>,
    pub bearer_token: Option<String>,
    pub use_random_user_agent: bool,
    /// Candidates for the rotating `User-Agent`; built-in list when unset.
    pub user_agents: Option<Vec<String>>,
    pub cancel_token: Option<CancelToken>,
    /// Overall budget for one top-level call, backoff and rate-limit waits included.
    pub deadline: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            query: Vec::new(),
            timeout: Duration::from_secs(10),
            proxy: None,
            tls_verify: true,
            retryer: Retryer::default(),
            rate_limiter: None,
            download_content: DownloadContent::default(),
            acceptable_codes: None,
            bearer_token: None,
            use_random_user_agent: true,
            user_agents: None,
            cancel_token: None,
            deadline: None,
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("proxy", &self.proxy)
            .field("tls_verify", &self.tls_verify)
            .field("retryer", &self.retryer)
            .field("rate_limiter", &self.rate_limiter)
            .field("download_content", &self.download_content)
            .field("acceptable_codes", &self.acceptable_codes)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .field("use_random_user_agent", &self.use_random_user_agent)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads configuration from `STEADY_HTTP_*` environment variables.
    ///
    /// Recognized: `METHOD`, `TIMEOUT_MS`, `ATTEMPTS`, `MIN_DELAY_MS`,
    /// `MAX_DELAY_MS`, `PROXY_URL`, `TLS_VERIFY`, `BEARER_TOKEN`. Unset
    /// variables keep their defaults; set-but-empty ones are rejected.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Same as [`RequestConfig::from_env`] with a custom variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Result<Option<String>> {
            let key = format!("{ENV_PREFIX}{name}");
            match lookup(&key) {
                Some(value) if value.trim().is_empty() => Err(RequestError::InvalidConfig(
                    format!("{key} is set but empty"),
                )),
                Some(value) => Ok(Some(value.trim().to_owned())),
                None => Ok(None),
            }
        };
        let millis = |name: &str| -> Result<Option<Duration>> {
            var(name)?
                .map(|value| {
                    value.parse::<u64>().map(Duration::from_millis).map_err(|err| {
                        RequestError::InvalidConfig(format!(
                            "{ENV_PREFIX}{name}='{value}' is not a number of milliseconds: {err}"
                        ))
                    })
                })
                .transpose()
        };

        let mut config = Self::default();

        if let Some(method) = var("METHOD")? {
            config.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|err| {
                    RequestError::InvalidConfig(format!("invalid method '{method}': {err}"))
                })?;
        }
        if let Some(timeout) = millis("TIMEOUT_MS")? {
            config.timeout = timeout;
        }

        let attempts = var("ATTEMPTS")?
            .map(|value| {
                value.parse::<u32>().map_err(|err| {
                    RequestError::InvalidConfig(format!(
                        "{ENV_PREFIX}ATTEMPTS='{value}' is not a positive integer: {err}"
                    ))
                })
            })
            .transpose()?;
        let min_delay = millis("MIN_DELAY_MS")?;
        let max_delay = millis("MAX_DELAY_MS")?;
        if attempts.is_some() || min_delay.is_some() || max_delay.is_some() {
            let defaults = Retryer::default();
            config.retryer = Retryer::new(
                attempts.unwrap_or(defaults.attempts()),
                min_delay.unwrap_or(defaults.min_delay()),
                max_delay.unwrap_or(defaults.max_delay()),
            )?;
        }

        if let Some(url) = var("PROXY_URL")? {
            config.proxy = Some(ProxyConfig::new(url));
        }
        if let Some(flag) = var("TLS_VERIFY")? {
            config.tls_verify = parse_flag(&flag).ok_or_else(|| {
                RequestError::InvalidConfig(format!(
                    "{ENV_PREFIX}TLS_VERIFY='{flag}' is not a boolean"
                ))
            })?;
        }
        config.bearer_token = var("BEARER_TOKEN")?;

        Ok(config)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Adds a header, replacing any value stored under the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
            RequestError::InvalidConfig(format!("invalid header name '{name}': {err}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            RequestError::InvalidConfig(format!("invalid value for header '{name}': {err}"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_tls_verify(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    pub fn with_retryer(mut self, retryer: Retryer) -> Self {
        self.retryer = retryer;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_download_content(mut self, mode: DownloadContent) -> Self {
        self.download_content = mode;
        self
    }

    pub fn with_acceptable_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.acceptable_codes = Some(codes.into_iter().collect());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_random_user_agent(mut self, enabled: bool) -> Self {
        self.use_random_user_agent = enabled;
        self
    }

    pub fn with_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub(crate) fn is_acceptable(&self, status: u16) -> bool {
        match &self.acceptable_codes {
            Some(codes) => codes.contains(&status),
            None => (200..300).contains(&status),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use reqwest::Method;

    use super::{ProxyConfig, RequestConfig};
    use crate::RequestError;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_accept_any_2xx() {
        let config = RequestConfig::default();
        assert_eq!(config.method, Method::GET);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.tls_verify);
        assert!(config.is_acceptable(200));
        assert!(config.is_acceptable(204));
        assert!(!config.is_acceptable(304));
        assert!(!config.is_acceptable(500));
    }

    #[test]
    fn explicit_acceptable_codes_replace_2xx() {
        let config = RequestConfig::default().with_acceptable_codes([200, 404]);
        assert!(config.is_acceptable(404));
        assert!(!config.is_acceptable(201));
    }

    #[test]
    fn headers_are_case_insensitive() {
        let config = RequestConfig::default()
            .with_header("X-Api-Key", "one")
            .and_then(|config| config.with_header("x-api-key", "two"))
            .expect("valid headers");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers["X-API-KEY"], "two");
    }

    #[test]
    fn invalid_header_is_config_error() {
        let err = RequestConfig::default()
            .with_header("bad header", "value")
            .expect_err("must fail");
        assert!(matches!(err, RequestError::InvalidConfig(_)));
    }

    #[test]
    fn from_env_reads_prefixed_variables() {
        let config = RequestConfig::from_env_with(lookup(&[
            ("STEADY_HTTP_METHOD", "post"),
            ("STEADY_HTTP_TIMEOUT_MS", "2500"),
            ("STEADY_HTTP_ATTEMPTS", "4"),
            ("STEADY_HTTP_MAX_DELAY_MS", "300"),
            ("STEADY_HTTP_TLS_VERIFY", "false"),
            ("STEADY_HTTP_PROXY_URL", "http://proxy:3128"),
            ("STEADY_HTTP_BEARER_TOKEN", "abc"),
        ]))
        .expect("must parse");

        assert_eq!(config.method, Method::POST);
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retryer.attempts(), 4);
        assert_eq!(config.retryer.max_delay(), Duration::from_millis(300));
        assert!(!config.tls_verify);
        assert_eq!(config.proxy, Some(ProxyConfig::new("http://proxy:3128")));
        assert_eq!(config.bearer_token.as_deref(), Some("abc"));
    }

    #[test]
    fn from_env_rejects_empty_and_malformed_values() {
        let empty = RequestConfig::from_env_with(lookup(&[("STEADY_HTTP_BEARER_TOKEN", " ")]));
        assert!(matches!(empty, Err(RequestError::InvalidConfig(_))));

        let malformed = RequestConfig::from_env_with(lookup(&[("STEADY_HTTP_ATTEMPTS", "many")]));
        assert!(matches!(malformed, Err(RequestError::InvalidConfig(_))));

        let zero = RequestConfig::from_env_with(lookup(&[("STEADY_HTTP_ATTEMPTS", "0")]));
        assert!(matches!(zero, Err(RequestError::InvalidConfig(_))));
    }

    #[test]
    fn from_env_without_variables_is_default() {
        let config = RequestConfig::from_env_with(|_| None).expect("must parse");
        assert_eq!(config.retryer.attempts(), 1);
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = RequestConfig::default()
            .with_bearer_token("secret-token")
            .with_proxy(ProxyConfig::new("http://proxy:3128").with_credentials("user", "hunter2"));
        let debug = format!("{config:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("hunter2"));
    }
}
