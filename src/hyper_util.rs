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

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::drain::DrainWatcher;

pub fn http1_server() -> http1::Builder {
    let mut b = http1::Builder::new();
    b.timer(TokioTimer::new());
    b
}

pub fn empty_response(code: hyper::StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::default())
        .expect("builder with known status code should not fail")
}

pub fn plaintext_response(code: hyper::StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(body.into())
        .expect("builder with known status code should not fail")
}

pub fn json_response(code: hyper::StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("builder with known status code should not fail")
}

/// Server implements a generic HTTP server with the following behavior:
/// * HTTP/1.1 plaintext only
/// * Each connection is served on its own task
/// * Draining: on drain, stop accepting and wait for in-flight connections to finish
pub struct Server<S> {
    name: String,
    listener: TcpListener,
    drain_rx: DrainWatcher,
    state: Arc<S>,
}

impl<S> Server<S> {
    pub async fn bind(
        name: &str,
        addr: SocketAddr,
        drain_rx: DrainWatcher,
        s: S,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {name} to {addr}"))?;
        Ok(Server {
            name: name.to_string(),
            listener,
            drain_rx,
            state: Arc::new(s),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .expect("local address must be ready")
    }

    pub fn spawn<F, R>(self, f: F)
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>, Request<Incoming>) -> R + Send + Sync + 'static,
        R: Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send + 'static,
    {
        let address = self.address();
        let Server {
            name,
            listener,
            drain_rx,
            state,
        } = self;
        let f = Arc::new(f);
        info!(
            %address,
            component=name,
            "listener established",
        );
        tokio::spawn(async move {
            let graceful = GracefulShutdown::new();
            let drain = drain_rx.wait_for_drain();
            tokio::pin!(drain);
            loop {
                tokio::select! {
                    res = listener.accept() => {
                        let (stream, remote) = match res {
                            Ok(conn) => conn,
                            Err(e) => {
                                warn!(component=name, "failed to accept connection: {e}");
                                continue;
                            }
                        };
                        let state = state.clone();
                        let f = f.clone();
                        let conn = http1_server()
                            .header_read_timeout(Duration::from_secs(2))
                            .max_buf_size(8 * 1024)
                            .serve_connection(
                                TokioIo::new(stream),
                                service_fn(move |req| f(state.clone(), req)),
                            );
                        let conn = graceful.watch(conn);
                        let name = name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = conn.await {
                                debug!(component=name, %remote, "connection closed with error: {e}");
                            }
                        });
                    }
                    blocker = &mut drain => {
                        info!("starting drain of {name} server");
                        graceful.shutdown().await;
                        info!("{name} server terminated");
                        drop(blocker);
                        return;
                    }
                }
            }
        });
    }
}
