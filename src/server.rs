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

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::drain::DrainWatcher;
use crate::error::{Code, Error, ErrorBody};
use crate::hyper_util;
use crate::metrics::{IncrementRecorder, RequestHandled};
use crate::proxy::MetadataRequest;
use crate::service::InfrabinService;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Server exposes an [`InfrabinService`] as JSON over HTTP.
pub struct Server {
    s: hyper_util::Server<InfrabinService>,
}

impl Server {
    pub async fn new(
        config: Arc<Config>,
        drain_rx: DrainWatcher,
        service: InfrabinService,
    ) -> anyhow::Result<Self> {
        hyper_util::Server::<InfrabinService>::bind("server", config.server_addr, drain_rx, service)
            .await
            .map(|s| Server { s })
    }

    pub fn address(&self) -> SocketAddr {
        self.s.address()
    }

    pub fn spawn(self) {
        self.s
            .spawn(|svc, req| async move { Ok(handle(&svc, req).await) })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Root,
    Delay(String),
    Env(String),
    Headers,
    Proxy,
    AwsMetadata(String),
    Any(String),
    AwsAssume(String),
    AwsGetCallerIdentity,
    Intermittent,
}

impl Route {
    fn parse(method: &Method, path: &str) -> Option<Route> {
        let get = *method == Method::GET;
        let route = match path {
            "/" if get => Route::Root,
            "/headers" if get || *method == Method::POST => Route::Headers,
            "/proxy" if *method == Method::POST => Route::Proxy,
            "/aws/get-caller-identity" if get => Route::AwsGetCallerIdentity,
            "/intermittent" if get => Route::Intermittent,
            _ if !get => return None,
            _ => {
                if let Some(s) = path.strip_prefix("/delay/") {
                    Route::Delay(s.to_string())
                } else if let Some(name) = path.strip_prefix("/env/") {
                    Route::Env(name.to_string())
                } else if let Some(p) = path.strip_prefix("/aws/metadata/") {
                    Route::AwsMetadata(p.to_string())
                } else if let Some(p) = path.strip_prefix("/any/") {
                    Route::Any(p.to_string())
                } else if let Some(role) = path.strip_prefix("/aws/assume/") {
                    Route::AwsAssume(role.to_string())
                } else {
                    return None;
                }
            }
        };
        Some(route)
    }

    /// endpoint is the label requests to this route are recorded under.
    fn endpoint(&self) -> &'static str {
        match self {
            Route::Root => "root",
            Route::Delay(_) => "delay",
            Route::Env(_) => "env",
            Route::Headers => "headers",
            Route::Proxy => "proxy",
            Route::AwsMetadata(_) => "aws_metadata",
            Route::Any(_) => "any",
            Route::AwsAssume(_) => "aws_assume",
            Route::AwsGetCallerIdentity => "aws_get_caller_identity",
            Route::Intermittent => "intermittent",
        }
    }
}

/// handle serves a single request. Errors are rendered as an [`ErrorBody`] with the HTTP status
/// matching their code.
pub async fn handle<B>(svc: &InfrabinService, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let (endpoint, result) = match Route::parse(&method, &path) {
        Some(route) => (route.endpoint(), dispatch(svc, route, req).await),
        None => (
            "unknown",
            Err(Error::NotFound(format!("no route for {method} {path}"))),
        ),
    };

    let code = result.as_ref().map_or_else(Error::code, |_| Code::Ok);
    svc.metrics().increment(&RequestHandled { endpoint, code });

    match result {
        Ok(body) => {
            debug!(%method, path, endpoint, "request served");
            hyper_util::json_response(hyper::StatusCode::OK, body)
        }
        Err(e) => {
            if code == Code::Internal {
                warn!(%method, path, endpoint, kind=e.kind(), "request failed: {e}");
            } else {
                debug!(%method, path, endpoint, kind=e.kind(), "request failed: {e}");
            }
            error_response(&e)
        }
    }
}

async fn dispatch<B>(svc: &InfrabinService, route: Route, req: Request<B>) -> Result<Vec<u8>, Error>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match route {
        Route::Root => encode(svc.root()),
        Route::Delay(seconds) => {
            let seconds = path_param(&seconds)?;
            let seconds = seconds
                .parse::<i64>()
                .map_err(|e| Error::Validation(format!("invalid duration {seconds:?}: {e}")))?;
            encode(svc.delay(seconds).await)
        }
        Route::Env(name) => encode(svc.env(&path_param(&name)?)),
        Route::Headers => {
            let (parts, body) = req.into_parts();
            let request = decode_body(body).await?;
            encode(Ok(svc.headers(request, &parts.headers)))
        }
        Route::Proxy => {
            let request = decode_body(req.into_body()).await?;
            encode(svc.proxy(request).await)
        }
        Route::AwsMetadata(path) => {
            let path = path_param(&path)?;
            encode(svc.aws_metadata(MetadataRequest { path }).await)
        }
        Route::Any(path) => encode(Ok(svc.any(&path_param(&path)?))),
        Route::AwsAssume(role) => encode(svc.aws_assume(&path_param(&role)?).await),
        Route::AwsGetCallerIdentity => encode(svc.aws_get_caller_identity().await),
        Route::Intermittent => encode(svc.intermittent()),
    }
}

/// path_param percent-decodes a captured path segment. `+` is kept as is.
fn path_param(raw: &str) -> Result<String, Error> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|p| p.into_owned())
        .map_err(|e| Error::Validation(format!("invalid path parameter {raw:?}: {e}")))
}

fn encode<T: Serialize>(result: Result<T, Error>) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(&result?).map_err(|e| Error::Internal(format!("encode response: {e}")))
}

/// decode_body reads a JSON request body. An empty body decodes to the default value.
async fn decode_body<T, B>(body: B) -> Result<T, Error>
where
    T: DeserializeOwned + Default,
    B: Body,
    B::Error: Into<BoxError>,
{
    let bytes = Limited::new(body, MAX_REQUEST_BODY)
        .collect()
        .await
        .map_err(|e| Error::Validation(format!("failed to read request body: {e}")))?
        .to_bytes();
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("invalid request body: {e}")))
}

fn error_response(e: &Error) -> Response<Full<Bytes>> {
    let status = e.code().http_status();
    match serde_json::to_vec(&ErrorBody::from(e)) {
        Ok(body) => hyper_util::json_response(status, body),
        Err(err) => hyper_util::plaintext_response(status, err.to_string()),
    }
}
