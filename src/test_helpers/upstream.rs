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

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::debug;

use crate::hyper_util::http1_server;

/// Reply is what a [`MockUpstream`] answers every request with.
#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    body: Bytes,
    delay: Duration,
}

impl Reply {
    pub fn json(v: serde_json::Value) -> Self {
        Self::raw(&v.to_string())
    }

    pub fn raw(body: &str) -> Self {
        Reply {
            status: 200,
            body: Bytes::from(body.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// delay holds the response back after the request has been recorded.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Recorded is a request as seen by the upstream. `path` includes the query.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// MockUpstream is a plaintext HTTP/1 server that records every request it receives.
pub struct MockUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockUpstream {
    pub async fn spawn(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<Recorded>>> = Arc::default();
        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                let recorded = recorded.clone();
                let svc = service_fn(move |req: Request<Incoming>| {
                    let reply = reply.clone();
                    let recorded = recorded.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await?.to_bytes();
                        recorded.lock().unwrap().push(Recorded {
                            method: parts.method.to_string(),
                            path: parts
                                .uri
                                .path_and_query()
                                .map(|p| p.to_string())
                                .unwrap_or_default(),
                            headers: parts
                                .headers
                                .iter()
                                .map(|(k, v)| {
                                    (k.to_string(), String::from_utf8_lossy(v.as_bytes()).to_string())
                                })
                                .collect(),
                            body: body.to_vec(),
                        });
                        tokio::time::sleep(reply.delay).await;
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(reply.status)
                                .header(hyper::header::CONTENT_TYPE, "application/json")
                                .body(Full::new(reply.body.clone()))
                                .unwrap(),
                        )
                    }
                });
                tokio::spawn(async move {
                    if let Err(e) = http1_server()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        debug!("mock upstream connection closed: {e}");
                    }
                });
            }
        });
        MockUpstream { addr, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}
