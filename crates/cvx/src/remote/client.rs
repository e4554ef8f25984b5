//! 📡 RemoteClient: equal parts HTTP client, status-code therapist, and coping mechanism.
//!
//! 🎬 COLD OPEN: INT. LOAD BALANCER, 3:47 AM
//!
//! A request leaves the building. It has a bearer token, a JSON body, and hope.
//! It will come back as one of: a parsed JSON value, a raw empty string (some PUTs
//! and DELETEs have nothing to say), or a classified [`RemoteError`].
//!
//! 🧠 Knowledge graph:
//! - URL: host with a scheme is used as-is, otherwise `https://` is prepended
//! - Query params: structured values are JSON-encoded, scalars pass through
//! - Headers: json + bearer auth by default, then `extra_headers` on top (same name
//!   means the extra value wins). Replaced wholesale for blob uploads
//!   (the storage endpoint rejects our bearer token like a club with a dress code)
//! - Body: POST/PUT always send JSON, `{}` when there's nothing to say
//! - Errors: no response → `Connectivity` (503), 4xx → `Rejected`, other non-2xx → `Remote`
//!
//! 🔄 This client does not retry. Retries are the caller's problem. Good luck. 🦆

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::app_config::RemoteConfig;
use crate::error::RemoteError;
use crate::remote::context::ClientContext;

/// 📦 One logical request, described before it is sent.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub params: Vec<(String, Value)>,
    pub body: Option<Value>,
    /// 🪣 PUT to a pre-signed storage URL: octet-stream + encryption headers, no bearer token.
    pub blob_upload: bool,
}

impl RemoteRequest {
    pub fn new(method: Method, host: impl Into<String>) -> Self {
        Self {
            method,
            host: host.into(),
            path: String::new(),
            params: Vec::new(),
            body: None,
            blob_upload: false,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params(mut self, params: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn blob_upload(mut self) -> Self {
        self.blob_upload = true;
        self
    }
}

/// 📬 What came back from a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteBody {
    /// 🧩 A decoded JSON document (`Null` for an empty non-PUT/DELETE body).
    Json(Value),
    /// 📄 The raw text of an empty or literal-`null` PUT/DELETE response, left unparsed.
    Raw(String),
}

impl RemoteBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            RemoteBody::Json(value) => Some(value),
            RemoteBody::Raw(_) => None,
        }
    }

    /// 🔄 JSON or bust: raw bodies become `Value::Null`.
    pub fn into_json(self) -> Value {
        match self {
            RemoteBody::Json(value) => value,
            RemoteBody::Raw(_) => Value::Null,
        }
    }
}

/// 📡 The envoy we send into the HTTP wilderness. One `reqwest::Client`, reused for every call.
///
/// The connection pool inside `reqwest::Client` is the only shared resource, and it is
/// released when the `RemoteClient` drops.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    context: ClientContext,
}

impl RemoteClient {
    /// 🚀 Validate the credentials and build the HTTP client with the configured timeouts.
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let context = ClientContext::new(config)
            .context("💀 The remote config is missing a credential. We refuse to call anyone without a name tag.")?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS stack having a moment.")?;
        Ok(Self { http, context })
    }

    /// 🔧 Wrap an existing `reqwest::Client` (tests, custom transports).
    pub fn with_http_client(context: ClientContext, http: reqwest::Client) -> Self {
        Self { http, context }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    /// 📡 Send one request to the host it names.
    pub async fn request(&self, request: RemoteRequest) -> Result<RemoteBody, RemoteError> {
        let hosts = [request.host.clone()];
        self.request_across(&hosts, &request).await
    }

    /// 🌐 Try each host in order until one answers.
    ///
    /// A 4xx (or a validation/decode problem) is an answer, and is returned immediately.
    /// Connectivity and server-side failures move on to the next host. When every host
    /// has failed, the result is `Unreachable` carrying each host's own error, even when
    /// there was only one host.
    pub async fn request_across(
        &self,
        hosts: &[String],
        request: &RemoteRequest,
    ) -> Result<RemoteBody, RemoteError> {
        let mut failures: Vec<(String, RemoteError)> = Vec::new();

        for host in hosts {
            match self.send_once(host, request).await {
                Ok(body) => return Ok(body),
                Err(err @ (RemoteError::Connectivity { .. } | RemoteError::Remote { .. })) => {
                    warn!("⚠️ {} {} failed on host {}: {}", request.method, request.path, host, err);
                    failures.push((host.clone(), err));
                }
                Err(err) => return Err(err),
            }
        }

        // 🕳️ one host or ten, the caller hears about all of them at once
        Err(RemoteError::Unreachable { attempts: failures })
    }

    /// 🏷️ Defaults first, extras inserted over them. One value per header name.
    fn json_headers(&self) -> Result<HeaderMap, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.context.api_key()))
            .map_err(|e| RemoteError::validation(format!("api key is not a valid header value: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);

        for (name, value) in self.context.extra_headers() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RemoteError::validation(format!("invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| RemoteError::validation(format!("invalid value for header '{name}': {e}")))?;
            // 🔁 insert, not append: the configured value replaces ours
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    async fn send_once(&self, host: &str, request: &RemoteRequest) -> Result<RemoteBody, RemoteError> {
        let url = build_url(host, &request.path, &request.params)?;
        trace!("📡 {} {}{}", request.method, url.host_str().unwrap_or_default(), url.path());

        let mut builder = self.http.request(request.method.clone(), url);

        // 🪣 the storage side gets its own header set, no bearer, no extras
        if request.blob_upload {
            builder = builder
                .header("Content-Type", "application/octet-stream")
                .header("x-amz-server-side-encryption", "AES256");
        } else {
            builder = builder.headers(self.json_headers()?);
        }

        if request.method == Method::POST || request.method == Method::PUT {
            // 📦 POST and PUT always carry a body, even an empty one
            let body = match &request.body {
                Some(value) if !is_empty_body(value) => serde_json::to_string(value)
                    .map_err(|e| RemoteError::validation(format!("could not encode request body: {e}")))?,
                _ => "{}".to_string(),
            };
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::connectivity(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::connectivity(e.to_string()))?;

        classify(&request.method, status, text)
    }
}

/// 🔧 host + path, scheme defaulted to https, params appended.
fn build_url(host: &str, path: &str, params: &[(String, Value)]) -> Result<Url, RemoteError> {
    let raw = if host.starts_with("http") {
        format!("{host}{path}")
    } else {
        format!("https://{host}{path}")
    };
    let mut url = Url::parse(&raw)
        .map_err(|e| RemoteError::validation(format!("invalid remote url '{raw}': {e}")))?;

    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, &encode_param(value));
        }
    }
    Ok(url)
}

/// 🧩 Structured params travel as JSON text, scalars as themselves.
fn encode_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Number(n) => n.to_string(),
        structured @ (Value::Array(_) | Value::Object(_)) => structured.to_string(),
    }
}

fn is_empty_body(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// 🏷️ Turn (method, status, body) into a `RemoteBody` or the right flavor of `RemoteError`.
fn classify(method: &Method, status: u16, text: String) -> Result<RemoteBody, RemoteError> {
    match status / 100 {
        2 => {
            let nothing_to_say = text.trim().is_empty() || text.trim() == "null";
            if (*method == Method::PUT || *method == Method::DELETE) && nothing_to_say {
                return Ok(RemoteBody::Raw(text));
            }
            if text.trim().is_empty() {
                return Ok(RemoteBody::Json(Value::Null));
            }
            serde_json::from_str(&text)
                .map(RemoteBody::Json)
                .map_err(|e| RemoteError::Decode(e.to_string()))
        }
        4 => {
            let message = remote_message(&text).unwrap_or_else(|| format!("{status} error"));
            debug!("🙅 remote rejected the request with {}: {}", status, message);
            Err(RemoteError::Rejected { status, message })
        }
        _ => {
            let message = remote_message(&text).unwrap_or_else(|| {
                if text.trim().is_empty() {
                    format!("{status} error")
                } else {
                    text.trim().to_string()
                }
            });
            Err(RemoteError::Remote { status, message })
        }
    }
}

/// 📜 The remote's `message` field, if the body is JSON and has one.
fn remote_message(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}
