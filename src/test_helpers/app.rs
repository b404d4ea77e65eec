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

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use super::helpers::initialize_telemetry;
use crate::aws::Sts;
use crate::config::Config;
use crate::environment::Source;
use crate::app;

#[derive(Clone, Copy, Debug)]
pub struct TestApp {
    pub server_address: SocketAddr,
    pub admin_address: SocketAddr,
    pub stats_address: SocketAddr,
}

/// with_app runs `f` against a freshly built app, then shuts the app down and waits for it to
/// terminate.
pub async fn with_app<F, Fut, FO>(cfg: Config, env: Arc<dyn Source>, sts: Arc<dyn Sts>, f: F)
where
    F: FnOnce(TestApp) -> Fut,
    Fut: Future<Output = FO>,
{
    initialize_telemetry();
    let app = app::build_with(Arc::new(cfg), env, sts).await.unwrap();
    let shutdown = app.shutdown.trigger();

    let ta = TestApp {
        server_address: app.server_address,
        admin_address: app.admin_address,
        stats_address: app.stats_address,
    };
    let run_and_shutdown = async {
        ta.ready().await;
        f(ta).await;
        shutdown.shutdown_now().await;
    };
    let (app, _shutdown) = tokio::join!(app.wait_termination(), run_and_shutdown);
    app.expect("app exits without error");
}

async fn send(
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: Bytes,
) -> anyhow::Result<(StatusCode, Bytes)> {
    let client: Client<HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(HttpConnector::new());
    let req = Request::builder()
        .method(method)
        .uri(format!("http://{addr}{path}"))
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(body))?;
    let resp = client.request(req).await?;
    let status = resp.status();
    let body = resp.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

impl TestApp {
    pub async fn request(&self, method: Method, path: &str, body: &str) -> (StatusCode, Bytes) {
        send(self.server_address, method, path, Bytes::from(body.to_string()))
            .await
            .expect("request")
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.request(Method::GET, path, "").await;
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.request(Method::POST, path, &body.to_string()).await;
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    pub async fn admin_request(&self, method: Method, path: &str) -> anyhow::Result<(StatusCode, String)> {
        let (status, body) = send(self.admin_address, method, path, Bytes::new()).await?;
        Ok((status, String::from_utf8(body.to_vec())?))
    }

    pub async fn metrics(&self) -> String {
        let (_, body) = send(self.stats_address, Method::GET, "/metrics", Bytes::new())
            .await
            .expect("metrics request");
        String::from_utf8(body.to_vec()).expect("metrics are utf-8")
    }

    pub async fn ready(&self) {
        for _ in 0..100 {
            if let Ok((StatusCode::OK, _)) = self.admin_request(Method::GET, "/healthz/ready").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
