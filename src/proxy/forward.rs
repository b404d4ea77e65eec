// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;
use rustls::crypto::CryptoProvider;
use serde_json::{Map, Value};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use super::ProxyRequest;
use crate::error::Error;

/// Forward performs a single upstream call for a validated proxy request and returns the decoded
/// response body.
#[async_trait::async_trait]
pub trait Forward: Send + Sync {
    async fn forward(&self, request: &ProxyRequest) -> Result<Map<String, Value>, Error>;
}

/// HttpForwarder forwards over HTTP/1.1, with TLS for `https` targets.
///
/// Connections are never reused: every call dials the upstream afresh.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    timeout: Duration,
}

#[cfg(feature = "tls-aws-lc")]
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

#[cfg(all(feature = "tls-ring", not(feature = "tls-aws-lc")))]
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn client_config() -> anyhow::Result<ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("failed to load native root certificate: {e}");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "loaded native root certificates");
    Ok(ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

impl HttpForwarder {
    /// new builds a forwarder whose calls, including reading the response body, must complete
    /// within `timeout`.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(timeout));
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(client_config()?)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(https);
        Ok(HttpForwarder { client, timeout })
    }

    fn build_request(request: &ProxyRequest) -> Result<Request<Full<Bytes>>, Error> {
        let body = match &request.body {
            Some(body) => serde_json::to_vec(body).map_err(Error::Encode)?,
            None => b"{}".to_vec(),
        };
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            Error::Validation(format!("Unable to build request: invalid method {:?}: {e}", request.method))
        })?;
        let uri: Uri = request.url.parse().map_err(|e| {
            Error::Validation(format!("Unable to build request: invalid url {}: {e}", request.url))
        })?;

        let mut req = Request::new(Full::new(Bytes::from(body)));
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                Error::Validation(format!("Unable to build request: invalid header name {key:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::Validation(format!("Unable to build request: invalid value for header {key}: {e}"))
            })?;
            // Replace rather than append, so caller headers win over anything set before
            req.headers_mut().insert(name, value);
        }
        Ok(req)
    }
}

#[async_trait::async_trait]
impl Forward for HttpForwarder {
    async fn forward(&self, request: &ProxyRequest) -> Result<Map<String, Value>, Error> {
        let req = Self::build_request(request)?;
        let deadline = Instant::now() + self.timeout;
        let network_error = |reason: String| Error::Network {
            url: request.url.clone(),
            reason,
        };

        let response = match timeout_at(deadline, self.client.request(req)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(network_error(format!("{:#}", anyhow::Error::new(e)))),
            Err(_) => {
                return Err(network_error(format!(
                    "request timed out after {:?}",
                    self.timeout
                )));
            }
        };
        let status = response.status();

        let body = match timeout_at(deadline, response.into_body().collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if truncated(&e) => return Err(Error::Close(e.to_string())),
            Ok(Err(e)) => return Err(Error::Read(e.to_string())),
            Err(_) => {
                return Err(Error::Read(format!(
                    "body not received within {:?}",
                    self.timeout
                )));
            }
        };
        trace!(url=%request.url, %status, len=body.len(), "upstream response received");

        // The status is not an error in itself; whatever JSON the upstream sent is returned
        decode_object(&body)
    }
}

/// truncated reports whether the upstream closed the response stream before the body completed.
fn truncated(e: &hyper::Error) -> bool {
    if e.is_incomplete_message() {
        return true;
    }
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::UnexpectedEof {
                return true;
            }
        }
        source = err.source();
    }
    false
}

/// decode_object parses an upstream body, which must be a JSON object.
pub fn decode_object(body: &[u8]) -> Result<Map<String, Value>, Error> {
    match serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))? {
        Value::Object(object) => Ok(object),
        other => Err(Error::Decode(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
