//! C1: the HTTP transport seam.
//!
//! Rather than an inheritance hierarchy, `Transport` is a single-method
//! trait of fixed, callable shape: method + url + headers + body + query
//! options in, `(status, headers, payload)` or a classified `Error` out.
//! That shape is what lets `AgentClient` (and tests) swap in a stub without
//! any dynamic dispatch beyond the one vtable call.

use crate::error::Error;
use async_trait::async_trait;
use std::convert::TryInto;
use std::str::FromStr;
use std::time::Duration;

/// HTTP methods this crate ever issues. Consul's API never needs more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    fn as_surf(self) -> surf::http::Method {
        match self {
            Method::Get => surf::http::Method::Get,
            Method::Put => surf::http::Method::Put,
            Method::Post => surf::http::Method::Post,
            Method::Delete => surf::http::Method::Delete,
            Method::Head => surf::http::Method::Head,
        }
    }

    /// get/head never carry a request body.
    fn carries_body(self) -> bool {
        !matches!(self, Method::Get | Method::Head)
    }
}

/// A query parameter. `None` renders as a bare, value-less key (Consul's
/// `?passing` filter is the one case this crate needs it for); `Some`
/// renders as the usual `key=value`.
pub type Param = (String, Option<String>);

/// Extra per-request knobs. Only `params` (query string additions) is
/// needed today; kept as a struct rather than a bare `Vec` so future knobs
/// (e.g. a per-call deadline override) don't change every call site.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<Param>,
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub options: RequestOptions,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        TransportRequest {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn params(mut self, params: Vec<Param>) -> Self {
        self.options.params = params;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl TransportResponse {
    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    /// Decodes `payload` to text using the charset named by `Content-Type`.
    /// `utf-8`/`utf8`/`application/json` decode as UTF-8, `iso-8859-1`
    /// decodes as Latin-1 (every byte maps to the codepoint of the same
    /// value), anything else is passed through lossily.
    pub fn decoded_text(&self) -> String {
        let lower = self.content_type().unwrap_or("").to_ascii_lowercase();
        if lower.contains("utf-8") || lower.contains("utf8") || lower.contains("application/json")
        {
            String::from_utf8_lossy(&self.payload).into_owned()
        } else if lower.contains("iso-8859-1") {
            self.payload.iter().map(|&b| b as char).collect()
        } else {
            String::from_utf8_lossy(&self.payload).into_owned()
        }
    }
}

/// A callable-shaped HTTP client. Implementors issue the request and
/// classify the outcome; they never retry or interpret response bodies —
/// that's `AgentClient`'s job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: TransportRequest) -> Result<TransportResponse, Error>;
}

/// The real transport, backed by `surf`. Redirects are never followed
/// (surf only follows them with an explicit `Redirect` middleware, which
/// this client never installs).
pub struct HttpTransport {
    client: surf::Client,
    overall_timeout: Duration,
    #[allow(dead_code)]
    connect_timeout: Duration,
}

impl HttpTransport {
    /// `overall_timeout` bounds the full round trip; `connect_timeout`
    /// is accepted for API symmetry with the spec but, since the
    /// underlying `surf`/`http-client` stack exposes only a single
    /// request deadline, is not separately enforced — `overall_timeout`
    /// is always the binding one.
    pub fn new(overall_timeout: Duration, connect_timeout: Duration) -> Result<Self, Error> {
        let config = surf::Config::new().set_timeout(Some(overall_timeout));
        let client = config
            .try_into()
            .map_err(|e: surf::Error| Error::Driver(e.to_string()))?;
        Ok(HttpTransport {
            client,
            overall_timeout,
            connect_timeout,
        })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        HttpTransport::new(Duration::from_millis(30_000), Duration::from_millis(5_000))
            .expect("default transport config is always valid")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        let mut url = surf::Url::parse(&request.url).map_err(|e| Error::Driver(e.to_string()))?;
        if !request.options.params.is_empty() {
            let query = build_query(url.query(), &request.options.params);
            url.set_query(Some(&query));
        }

        let mut req = surf::Request::new(request.method.as_surf(), url);
        for (name, value) in &request.headers {
            req.append_header(name.as_str(), value.as_str());
        }

        if request.method.carries_body() {
            if let Some(bytes) = request.body {
                req.set_body(body_with_content_type(bytes, &request.headers));
            }
        }

        // Covers the send *and* the body read under one deadline — a stalled
        // response body shouldn't be able to hang past `overall_timeout` any
        // more than a stalled connect can.
        let round_trip = async {
            let mut response = self.client.send(req).await.map_err(classify_surf_error)?;
            let status = response.status() as u16;
            let headers = response
                .iter()
                .map(|(name, values)| {
                    let value = values.get(0).map(|v| v.as_str().to_string()).unwrap_or_default();
                    (name.to_string(), value)
                })
                .collect();
            let payload = response
                .body_bytes()
                .await
                .map_err(|e| Error::Driver(e.to_string()))?;
            Ok::<_, Error>((status, headers, payload))
        };

        match async_std::future::timeout(self.overall_timeout, round_trip).await {
            Err(_elapsed) => Err(Error::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok((status, headers, payload))) => Ok(TransportResponse {
                status,
                headers,
                payload,
            }),
        }
    }
}

/// Builds a `surf::Body` carrying `bytes`, with its mime set from the
/// request's own `Content-Type` header when one is present.
///
/// `surf::Body::from_bytes` defaults to `application/octet-stream`, and
/// `Request::set_body` re-derives the request's `Content-Type` header from
/// the body's mime — replacing, not merging, whatever was appended to the
/// request's header list earlier. So the desired content type has to live
/// on the `Body` itself for it to survive `set_body`.
fn body_with_content_type(bytes: Vec<u8>, headers: &[(String, String)]) -> surf::Body {
    let mut body = surf::Body::from_bytes(bytes);
    if let Some((_, value)) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
    {
        if let Ok(mime) = surf::http::Mime::from_str(value) {
            body.set_mime(mime);
        }
    }
    body
}

/// Appends `params` to `existing` (the url's current query string, if
/// any), preserving every pre-existing key — new params are always
/// appended with `&`, never replacing one already present.
fn build_query(existing: Option<&str>, params: &[Param]) -> String {
    let mut parts: Vec<String> = match existing {
        Some(q) if !q.is_empty() => vec![q.to_string()],
        _ => Vec::new(),
    };
    for (name, value) in params {
        let encoded_name: String = url::form_urlencoded::byte_serialize(name.as_bytes()).collect();
        match value {
            Some(v) => {
                let encoded_value: String =
                    url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
                parts.push(format!("{}={}", encoded_name, encoded_value));
            }
            None => parts.push(encoded_name),
        }
    }
    parts.join("&")
}

/// `surf::Error` doesn't distinguish connect failures from other driver
/// failures in its public API; this is a best-effort classification based
/// on the error's message, matching the kinds spec'd in `Error`.
fn classify_surf_error(e: surf::Error) -> Error {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("connect") || lower.contains("connection refused") {
        Error::Connect
    } else {
        Error::Driver(message)
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use async_std::sync::Mutex;
    use std::collections::VecDeque;

    /// What a `StubTransport` does with the next call it receives.
    pub enum Reply {
        Ok(TransportResponse),
        Err(String),
    }

    impl Reply {
        pub fn status(status: u16, payload: impl Into<Vec<u8>>) -> Self {
            Reply::Ok(TransportResponse {
                status,
                headers: vec![("content-type".into(), "application/json".into())],
                payload: payload.into(),
            })
        }
    }

    /// Deterministic stand-in for `HttpTransport` used across this crate's
    /// unit and scenario tests. Replies are consumed in order; the last
    /// queued reply repeats once the queue is drained, so a test can queue
    /// one failure followed by steady-state success.
    pub struct StubTransport {
        replies: Mutex<VecDeque<Reply>>,
        pub(crate) calls: Mutex<Vec<TransportRequest>>,
    }

    impl StubTransport {
        pub fn new(replies: Vec<Reply>) -> Self {
            StubTransport {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn always(reply: Reply) -> Self {
            StubTransport::new(vec![reply])
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn call(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
            self.calls.lock().await.push(request);
            let mut queue = self.replies.lock().await;
            let reply = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                match queue.front() {
                    Some(Reply::Ok(r)) => Reply::Ok(r.clone()),
                    Some(Reply::Err(e)) => Reply::Err(e.clone()),
                    None => Reply::Err("stub exhausted".to_string()),
                }
            };
            match reply {
                Reply::Ok(response) => Ok(response),
                Reply::Err(message) => Err(Error::Driver(message)),
            }
        }
    }

    #[test]
    fn build_query_appends_without_replacing_existing_keys() {
        let params = vec![("token".to_string(), Some("secret".to_string()))];
        assert_eq!(build_query(Some("dc=dc1"), &params), "dc=dc1&token=secret");
    }

    #[test]
    fn build_query_renders_value_less_params_bare() {
        let params = vec![("passing".to_string(), None)];
        assert_eq!(build_query(Some("dc=dc1"), &params), "dc=dc1&passing");
    }

    #[test]
    fn build_query_with_no_existing_query() {
        let params = vec![("tag".to_string(), Some("v1".to_string()))];
        assert_eq!(build_query(None, &params), "tag=v1");
    }

    #[test]
    fn body_with_content_type_carries_the_requested_mime() {
        let headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        let body = body_with_content_type(b"{}".to_vec(), &headers);
        assert_eq!(body.mime(), &surf::http::mime::JSON);
    }

    #[test]
    fn body_with_content_type_defaults_without_a_header() {
        let body = body_with_content_type(b"raw".to_vec(), &[]);
        assert_eq!(body.mime(), &surf::http::mime::BYTE_STREAM);
    }

    #[async_std::test]
    async fn decoded_text_prefers_utf8_for_json() {
        let response = TransportResponse {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            payload: b"{\"a\":1}".to_vec(),
        };
        assert_eq!(response.decoded_text(), "{\"a\":1}");
    }

    #[async_std::test]
    async fn decoded_text_latin1_maps_bytes_to_codepoints() {
        let response = TransportResponse {
            status: 200,
            headers: vec![("content-type".into(), "text/plain; charset=iso-8859-1".into())],
            payload: vec![0xe9],
        };
        assert_eq!(response.decoded_text(), "\u{e9}".to_string());
    }
}
