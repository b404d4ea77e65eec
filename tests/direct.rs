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
use std::time::Duration;

use hyper::{Method, StatusCode};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

use infrabin::aws::{self, CallerIdentity};
use infrabin::config::Config;
use infrabin::environment::ProcessEnv;
use infrabin::test_helpers::app::{TestApp, with_app};
use infrabin::test_helpers::sts::MockSts;
use infrabin::test_helpers::upstream::{MockUpstream, Reply};
use infrabin::test_helpers::*;

async fn run<F, Fut>(cfg: Config, f: F)
where
    F: FnOnce(TestApp) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    with_app(cfg, Arc::new(ProcessEnv), Arc::new(aws::Unconfigured), f).await
}

#[tokio::test]
async fn test_shutdown_lifecycle() {
    helpers::initialize_telemetry();

    let app = infrabin::app::build(Arc::new(test_config())).await.unwrap();

    let shutdown = app.shutdown.trigger();
    let (app, _shutdown) = tokio::join!(
        time::timeout(Duration::from_secs(5), app.wait_termination()),
        shutdown.shutdown_now()
    );
    app.expect("app shuts down")
        .expect("app exits without error")
}

#[tokio::test]
async fn test_quitquitquit() {
    helpers::initialize_telemetry();

    let app = infrabin::app::build(Arc::new(test_config())).await.unwrap();
    let ta = TestApp {
        server_address: app.server_address,
        admin_address: app.admin_address,
        stats_address: app.stats_address,
    };
    let (status, _) = ta
        .admin_request(Method::POST, "/quitquitquit")
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    time::timeout(Duration::from_secs(5), app.wait_termination())
        .await
        .expect("app shuts down")
        .expect("app exits without error");
}

// Check that port conflicts on any address results in the app failing instead of silently failing
async fn test_bind_conflict<F: FnOnce(&mut Config) -> &mut SocketAddr>(f: F) {
    helpers::initialize_telemetry();
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut cfg = test_config();
    let sa = f(&mut cfg);
    *sa = l.local_addr().unwrap();
    let app = infrabin::app::build(Arc::new(cfg)).await;
    assert!(app.is_err(), "expected bind conflict");
}

#[tokio::test]
async fn test_conflict_server() {
    test_bind_conflict(|c| &mut c.server_addr).await;
}

#[tokio::test]
async fn test_conflict_admin() {
    test_bind_conflict(|c| &mut c.admin_addr).await;
}

#[tokio::test]
async fn test_conflict_stats() {
    test_bind_conflict(|c| &mut c.stats_addr).await;
}

#[tokio::test]
async fn test_admin_endpoints() {
    run(test_config(), |app| async move {
        let (status, body) = app.admin_request(Method::GET, "/healthz/ready").await.unwrap();
        assert_eq!((status, body.as_str()), (StatusCode::OK, "ready\n"));

        let (status, _) = app.admin_request(Method::GET, "/healthz/live").await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.admin_request(Method::GET, "/config_dump").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        let dump: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(dump["config"]["proxyEndpoint"], true);
    })
    .await;
}

#[tokio::test]
async fn test_root() {
    let env = HashMap::from([
        ("POD_NAME".to_string(), "infrabin-0".to_string()),
        ("K8S_NAMESPACE".to_string(), "testing".to_string()),
    ]);
    with_app(
        test_config(),
        Arc::new(env),
        Arc::new(aws::Unconfigured),
        |app| async move {
            let (status, body) = app.get_json("/").await;
            assert_eq!(status, StatusCode::OK);
            assert!(body["hostname"].is_string());
            assert_eq!(body["kubernetes"]["podName"], "infrabin-0");
            assert_eq!(body["kubernetes"]["namespace"], "testing");
            assert_eq!(body["kubernetes"]["region"], "");
        },
    )
    .await;
}

#[tokio::test]
async fn test_proxy() {
    let upstream = MockUpstream::spawn(Reply::json(json!({"ok": true}))).await;
    let url = upstream.url("/echo");
    run(test_config(), |app| async move {
        let (status, body) = app
            .post_json(
                "/proxy",
                json!({
                    "method": "POST",
                    "url": url,
                    "headers": {"x-infrabin": "yes"},
                    "body": {"hello": "world"},
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));

        let metrics = app.metrics().await;
        assert!(
            metrics.contains(r#"infrabin_proxy_upstream_requests_total{result="success"} 1"#),
            "{metrics}"
        );
        assert!(
            metrics.contains(r#"infrabin_requests_total{endpoint="proxy",code="OK"} 1"#),
            "{metrics}"
        );
    })
    .await;

    let seen = upstream.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/echo");
    assert_eq!(seen[0].headers["x-infrabin"], "yes");
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&seen[0].body).unwrap(),
        json!({"hello": "world"})
    );
}

#[tokio::test]
async fn test_proxy_blocked() {
    let upstream = MockUpstream::spawn(Reply::json(json!({"ok": true}))).await;
    let url = upstream.url("/");
    let cfg = Config {
        proxy_allow_regexp: r"^https://allowed\.example".to_string(),
        ..test_config()
    };
    run(cfg, |app| async move {
        let (status, body) = app
            .post_json("/proxy", json!({"method": "GET", "url": url}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 3);
        assert_eq!(body["kind"], "policy");
    })
    .await;
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn test_proxy_disabled() {
    let upstream = MockUpstream::spawn(Reply::json(json!({"ok": true}))).await;
    let url = upstream.url("/");
    let cfg = Config {
        proxy_endpoint: false,
        ..test_config()
    };
    run(cfg, |app| async move {
        let (status, body) = app
            .post_json("/proxy", json!({"method": "GET", "url": url}))
            .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["kind"], "unimplemented");

        let (status, _) = app.get_json("/aws/metadata/hostname").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    })
    .await;
    assert!(upstream.requests().is_empty());
}

#[tokio::test]
async fn test_proxy_upstream_unreachable() {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", l.local_addr().unwrap());
    drop(l);
    run(test_config(), |app| async move {
        let (status, body) = app
            .post_json("/proxy", json!({"method": "GET", "url": url}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "network");
        assert!(
            body["message"].as_str().unwrap().starts_with("Unable to reach "),
            "{body}"
        );
    })
    .await;
}

// A client that goes away mid request must not leave the upstream call running until the timeout
#[tokio::test]
async fn test_proxy_cancelled_on_client_disconnect() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/slow", upstream.local_addr().unwrap());
    let cfg = Config {
        proxy_timeout: Duration::from_secs(30),
        ..test_config()
    };
    run(cfg, |app| async move {
        let body = json!({"method": "GET", "url": url}).to_string();
        let mut client = TcpStream::connect(app.server_address).await.unwrap();
        client
            .write_all(
                format!(
                    "POST /proxy HTTP/1.1\r\nhost: infrabin\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{body}",
                    body.len()
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let (mut conn, _) = time::timeout(Duration::from_secs(5), upstream.accept())
            .await
            .expect("request is forwarded")
            .unwrap();
        let mut buf = [0u8; 4096];
        assert!(conn.read(&mut buf).await.unwrap() > 0);

        drop(client);
        let start = time::Instant::now();
        let closed = time::timeout(Duration::from_secs(5), async {
            // the upstream never answers, so the only way out is the forwarder hanging up
            while let Ok(n) = conn.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        })
        .await;
        assert!(
            closed.is_ok(),
            "upstream still connected {:?} after the client left",
            start.elapsed()
        );
    })
    .await;
}

#[tokio::test]
async fn test_aws_metadata() {
    let upstream = MockUpstream::spawn(Reply::json(json!({"hostname": "ip-10-0-0-1"}))).await;
    let cfg = Config {
        aws_metadata_endpoint: upstream.url("/latest/meta-data"),
        ..test_config()
    };
    run(cfg, |app| async move {
        let (status, body) = app.get_json("/aws/metadata/hostname").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"hostname": "ip-10-0-0-1"}));

        let (status, body) = app.get_json("/aws/metadata/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "path must not be empty");
    })
    .await;

    let seen = upstream.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].path, "/latest/meta-data/hostname");
}

#[tokio::test]
async fn test_intermittent() {
    let cfg = Config {
        intermittent_errors: 2,
        ..test_config()
    };
    run(cfg, |app| async move {
        for remaining in [2, 1] {
            let (status, body) = app.get_json("/intermittent").await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body["message"], format!("{remaining} errors left"));
        }
        let (status, body) = app.get_json("/intermittent").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"intermittent": {"intermittentErrors": 2}}));

        let metrics = app.metrics().await;
        assert!(
            metrics.contains("infrabin_intermittent_failures_total 2"),
            "{metrics}"
        );
        assert!(
            metrics.contains(r#"infrabin_requests_total{endpoint="intermittent",code="Unavailable"} 2"#),
            "{metrics}"
        );
    })
    .await;
}

#[tokio::test]
async fn test_delay_capped() {
    let cfg = Config {
        max_delay: Duration::from_secs(1),
        ..test_config()
    };
    run(cfg, |app| async move {
        let start = time::Instant::now();
        let (status, body) = app.get_json("/delay/30").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"delay": 1}));
        assert!(start.elapsed() < Duration::from_secs(10));
    })
    .await;
}

#[tokio::test]
async fn test_aws_identity() {
    let sts = MockSts {
        role_id: Some("AROAEXAMPLE:aws-assume-session-infrabin".to_string()),
        identity: Some(CallerIdentity {
            account: "123456789012".to_string(),
            arn: "arn:aws:sts::123456789012:assumed-role/reader/infrabin".to_string(),
            user_id: "AROAEXAMPLE".to_string(),
        }),
        ..Default::default()
    };
    let sts = Arc::new(sts);
    with_app(test_config(), Arc::new(ProcessEnv), sts.clone(), |app| async move {
        let (status, body) = app.get_json("/aws/assume/reader").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"assumedRoleId": "AROAEXAMPLE:aws-assume-session-infrabin"})
        );

        let (status, _) = app.get_json("/aws/assume/ops%40team%2Breader%3Dv2").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.get_json("/aws/get-caller-identity").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["getCallerIdentity"]["account"], "123456789012");
        assert_eq!(body["getCallerIdentity"]["userId"], "AROAEXAMPLE");
    })
    .await;

    let roles: Vec<String> = sts
        .assumed
        .lock()
        .unwrap()
        .iter()
        .map(|(role, _)| role.clone())
        .collect();
    assert_eq!(roles, ["reader", "ops@team+reader=v2"]);
}

#[tokio::test]
async fn test_unconfigured_sts() {
    run(test_config(), |app| async move {
        let (status, body) = app.get_json("/aws/get-caller-identity").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "identity");
    })
    .await;
}
