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

use anyhow::Context;
use prometheus_client::registry::Registry;
use tokio::time;
use tracing::{info, warn};

use crate::aws::{self, Sts};
use crate::config::Config;
use crate::environment::{self, Source};
use crate::metrics::Metrics;
use crate::proxy::HttpForwarder;
use crate::service::InfrabinService;
use crate::{admin, drain, metrics, readiness, server, signal};

/// build_with starts every server with the given environment and STS client. The servers are
/// bound and serving by the time it returns.
pub async fn build_with(
    config: Arc<Config>,
    env: Arc<dyn Source>,
    sts: Arc<dyn Sts>,
) -> anyhow::Result<Bound> {
    let mut registry = Registry::default();
    let metrics = Arc::new(Metrics::from(&mut registry));

    let shutdown = signal::Shutdown::new();
    let (drain_tx, drain_rx) = drain::new();

    let ready = readiness::Ready::new();
    let server_task = ready.register_task("server listener");

    let admin_server = admin::Service::new(
        config.clone(),
        ready.clone(),
        shutdown.trigger(),
        drain_rx.clone(),
    )
    .await
    .context("admin server starts")?;
    let stats_server = metrics::Server::new(config.clone(), drain_rx.clone(), registry)
        .await
        .context("stats server starts")?;

    let forwarder =
        HttpForwarder::new(config.proxy_timeout).context("proxy client configuration")?;
    let service = InfrabinService::new(
        config.clone(),
        env,
        Arc::new(forwarder),
        sts,
        metrics,
    );
    let main_server = server::Server::new(config.clone(), drain_rx, service)
        .await
        .context("server starts")?;

    let admin_address = admin_server.address();
    let stats_address = stats_server.address();
    let server_address = main_server.address();

    admin_server.spawn();
    stats_server.spawn();
    main_server.spawn();
    drop(server_task);

    Ok(Bound {
        server_address,
        admin_address,
        stats_address,
        shutdown,
        drain_tx,
        config,
    })
}

/// build starts the servers against the process environment, without an STS client.
pub async fn build(config: Arc<Config>) -> anyhow::Result<Bound> {
    build_with(
        config,
        Arc::new(environment::ProcessEnv),
        Arc::new(aws::Unconfigured),
    )
    .await
}

pub struct Bound {
    pub server_address: SocketAddr,
    pub admin_address: SocketAddr,
    pub stats_address: SocketAddr,

    pub shutdown: signal::Shutdown,
    drain_tx: drain::DrainTrigger,
    config: Arc<Config>,
}

impl Bound {
    /// wait_termination blocks until a shutdown is requested, then drains every server, giving up
    /// on in-flight requests after the termination grace period.
    pub async fn wait_termination(self) -> anyhow::Result<()> {
        self.shutdown.wait().await;

        match time::timeout(
            self.config.termination_grace_period,
            self.drain_tx.start_drain_and_wait(),
        )
        .await
        {
            Ok(()) => info!("Shutdown completed gracefully"),
            Err(_) => warn!(
                "Graceful shutdown did not complete in {:?}, terminating now",
                self.config.termination_grace_period
            ),
        }
        Ok(())
    }
}
