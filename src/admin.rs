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
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use itertools::Itertools;

use crate::config::Config;
use crate::drain::DrainWatcher;
use crate::hyper_util::{empty_response, json_response, plaintext_response};
use crate::readiness::Ready;
use crate::signal::ShutdownTrigger;
use crate::version::BuildInfo;
use crate::{hyper_util, telemetry};

struct State {
    config: Arc<Config>,
    ready: Ready,
    shutdown_trigger: ShutdownTrigger,
}

pub struct Service {
    s: hyper_util::Server<State>,
}

#[derive(serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDump {
    config: Config,
    version: BuildInfo,
}

impl Service {
    pub async fn new(
        config: Arc<Config>,
        ready: Ready,
        shutdown_trigger: ShutdownTrigger,
        drain_rx: DrainWatcher,
    ) -> anyhow::Result<Self> {
        hyper_util::Server::<State>::bind(
            "admin",
            config.admin_addr,
            drain_rx,
            State {
                config,
                ready,
                shutdown_trigger,
            },
        )
        .await
        .map(|s| Service { s })
    }

    pub fn address(&self) -> SocketAddr {
        self.s.address()
    }

    pub fn spawn(self) {
        self.s.spawn(|state, req| async move {
            match req.uri().path() {
                "/healthz/ready" => Ok(handle_ready(&state.ready, &req)),
                "/healthz/live" => Ok(plaintext_response(
                    hyper::StatusCode::OK,
                    "live\n".to_string(),
                )),
                "/quitquitquit" => {
                    Ok(handle_server_shutdown(&state.shutdown_trigger, req.method()).await)
                }
                "/config_dump" => Ok(handle_config_dump(ConfigDump {
                    config: state.config.as_ref().clone(),
                    version: BuildInfo::new(),
                })),
                "/logging" => Ok(handle_logging(&req)),
                _ => Ok(empty_response(hyper::StatusCode::NOT_FOUND)),
            }
        })
    }
}

fn handle_ready<B>(ready: &Ready, req: &Request<B>) -> Response<Full<Bytes>> {
    match *req.method() {
        hyper::Method::GET => {
            let pending = ready.pending();
            if pending.is_empty() {
                return plaintext_response(hyper::StatusCode::OK, "ready\n".to_string());
            }
            plaintext_response(
                hyper::StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "not ready, pending: {}\n",
                    pending.into_iter().sorted().join(", ")
                ),
            )
        }
        _ => empty_response(hyper::StatusCode::METHOD_NOT_ALLOWED),
    }
}

async fn handle_server_shutdown(
    shutdown_trigger: &ShutdownTrigger,
    method: &hyper::Method,
) -> Response<Full<Bytes>> {
    match *method {
        hyper::Method::POST => {
            shutdown_trigger.shutdown_now().await;
            plaintext_response(hyper::StatusCode::OK, "shutdown now\n".to_string())
        }
        _ => empty_response(hyper::StatusCode::METHOD_NOT_ALLOWED),
    }
}

fn handle_config_dump(dump: ConfigDump) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(&dump) {
        Ok(body) => json_response(hyper::StatusCode::OK, body),
        Err(e) => plaintext_response(
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to dump config: {e}\n"),
        ),
    }
}

static HELP_STRING: &str = "
usage: GET /logging\t\t\t\t\t\t(To list current level)
usage: POST /logging?level=<level>\t\t\t\t(To change global levels)
usage: POST /logging?level={mod1}={level1},{mod2}={level2}\t(To change specific mods' logging level)
usage: POST /logging?reset=true\t\t\t\t(To restore the startup level)

hint: loglevel:\terror|warn|info|debug|trace|off
hint: mod_name:\tthe module name, i.e. infrabin::proxy
";

fn handle_logging<B>(req: &Request<B>) -> Response<Full<Bytes>> {
    match *req.method() {
        hyper::Method::GET => list_loggers(),
        hyper::Method::POST => {
            let qp: HashMap<String, String> = req
                .uri()
                .query()
                .map(|v| {
                    url::form_urlencoded::parse(v.as_bytes())
                        .into_owned()
                        .collect()
                })
                .unwrap_or_default();
            let level = qp.get("level").cloned();
            let reset = qp.get("reset").is_some_and(|r| r != "false");
            if level.is_some() || reset {
                change_log_level(reset, &level.unwrap_or_default())
            } else {
                list_loggers()
            }
        }
        _ => plaintext_response(
            hyper::StatusCode::METHOD_NOT_ALLOWED,
            format!("Invalid HTTP method\n {HELP_STRING}"),
        ),
    }
}

fn list_loggers() -> Response<Full<Bytes>> {
    match telemetry::get_current_loglevel() {
        Ok(loglevel) => plaintext_response(
            hyper::StatusCode::OK,
            format!("current log level is {loglevel}\n"),
        ),
        Err(err) => plaintext_response(
            hyper::StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to get the log level: {err}\n {HELP_STRING}"),
        ),
    }
}

fn change_log_level(reset: bool, level: &str) -> Response<Full<Bytes>> {
    match telemetry::set_level(reset, level) {
        Ok(_) => list_loggers(),
        Err(e) => plaintext_response(
            hyper::StatusCode::BAD_REQUEST,
            format!("failed to set new level: {e}\n{HELP_STRING}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::signal::Shutdown;
    use crate::test_helpers;
    use crate::test_helpers::helpers::initialize_telemetry;

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn post(uri: &str) -> Request<()> {
        Request::builder()
            .method(hyper::Method::POST)
            .uri(uri)
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn ready_tracks_pending_tasks() {
        let ready = Ready::new();
        let task = ready.register_task("server");
        let resp = handle_ready(&ready, &get("/healthz/ready"));
        assert_eq!(resp.status(), hyper::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(resp).await.contains("server"));

        drop(task);
        let resp = handle_ready(&ready, &get("/healthz/ready"));
        assert_eq!(resp.status(), hyper::StatusCode::OK);
        assert_eq!(body_string(resp).await, "ready\n");

        let resp = handle_ready(&ready, &post("/healthz/ready"));
        assert_eq!(resp.status(), hyper::StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn config_dump_contains_config_and_version() {
        let config = test_helpers::test_config();
        let resp = handle_config_dump(ConfigDump {
            config: config.clone(),
            version: BuildInfo::new(),
        });
        assert_eq!(resp.status(), hyper::StatusCode::OK);
        let dump: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(dump["config"]["proxyAllowRegexp"], config.proxy_allow_regexp);
        assert_eq!(dump["config"]["intermittentErrors"], config.intermittent_errors);
        assert!(dump["version"]["version"].is_string());
    }

    #[tokio::test]
    async fn quitquitquit_requires_post() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.trigger();
        let resp = handle_server_shutdown(&trigger, &hyper::Method::GET).await;
        assert_eq!(resp.status(), hyper::StatusCode::METHOD_NOT_ALLOWED);

        let resp = handle_server_shutdown(&trigger, &hyper::Method::POST).await;
        assert_eq!(resp.status(), hyper::StatusCode::OK);
        // The trigger fired, so waiting returns without a signal
        tokio::time::timeout(std::time::Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn logging_level_changes() {
        initialize_telemetry();
        let resp = handle_logging(&get("/logging"));
        assert_eq!(resp.status(), hyper::StatusCode::OK);

        let resp = handle_logging(&post("/logging?level=infrabin::admin=trace"));
        assert_eq!(resp.status(), hyper::StatusCode::OK);
        assert!(body_string(resp).await.starts_with("current log level is "));

        let resp = handle_logging(&post("/logging?level=infrabin=notalevel"));
        assert_eq!(resp.status(), hyper::StatusCode::BAD_REQUEST);

        let resp = handle_logging(&post("/logging?reset=true"));
        assert_eq!(resp.status(), hyper::StatusCode::OK);

        let put = Request::builder()
            .method(hyper::Method::PUT)
            .uri("/logging")
            .body(())
            .unwrap();
        let resp = handle_logging(&put);
        assert_eq!(resp.status(), hyper::StatusCode::METHOD_NOT_ALLOWED);
    }
}
