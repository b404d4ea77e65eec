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

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::error::{Code, Error};

mod server;
pub use server::*;

/// Metrics for every RPC served, plus the proxy and intermittent endpoints.
pub struct Metrics {
    requests: Family<RequestLabels, Counter>,
    upstream_requests: Family<UpstreamLabels, Counter>,
    intermittent_failures: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: String,
    pub code: String,
}

#[derive(Clone, Hash, PartialEq, Eq, Debug, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub result: String,
}

/// RequestHandled is recorded once per inbound RPC.
pub struct RequestHandled {
    pub endpoint: &'static str,
    pub code: Code,
}

/// UpstreamResult is recorded once per proxy call that reached the forwarder.
pub struct UpstreamResult<'a> {
    pub error: Option<&'a Error>,
}

/// IntermittentFailure is recorded each time a failure is injected.
pub struct IntermittentFailure;

impl Metrics {
    fn new(registry: &mut Registry) -> Self {
        let requests = Family::default();
        registry.register(
            "requests",
            "The total number of RPCs handled, by endpoint and status code",
            requests.clone(),
        );
        let upstream_requests = Family::default();
        registry.register(
            "proxy_upstream_requests",
            "The total number of upstream requests made by the proxy endpoints, by result",
            upstream_requests.clone(),
        );
        let intermittent_failures = Counter::default();
        registry.register(
            "intermittent_failures",
            "The total number of failures injected by the intermittent endpoint",
            intermittent_failures.clone(),
        );
        Self {
            requests,
            upstream_requests,
            intermittent_failures,
        }
    }
}

impl From<&mut Registry> for Metrics {
    fn from(registry: &mut Registry) -> Self {
        Metrics::new(registry.sub_registry_with_prefix("infrabin"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        let mut registry = Registry::default();
        Metrics::from(&mut registry)
    }
}

pub trait Recorder<E, T> {
    /// Record the given event
    fn record(&self, event: &E, meta: T);
}

pub trait IncrementRecorder<E>: Recorder<E, u64> {
    /// Record the given event by incrementing the counter by count
    fn increment(&self, event: &E);
}

impl<E, R> IncrementRecorder<E> for R
where
    R: Recorder<E, u64>,
{
    fn increment(&self, event: &E) {
        self.record(event, 1);
    }
}

impl Recorder<RequestHandled, u64> for Metrics {
    fn record(&self, event: &RequestHandled, count: u64) {
        self.requests
            .get_or_create(&RequestLabels {
                endpoint: event.endpoint.to_string(),
                code: event.code.as_str().to_string(),
            })
            .inc_by(count);
    }
}

impl Recorder<UpstreamResult<'_>, u64> for Metrics {
    fn record(&self, event: &UpstreamResult<'_>, count: u64) {
        let result = event.error.map(Error::kind).unwrap_or("success");
        self.upstream_requests
            .get_or_create(&UpstreamLabels {
                result: result.to_string(),
            })
            .inc_by(count);
    }
}

impl Recorder<IntermittentFailure, u64> for Metrics {
    fn record(&self, _: &IntermittentFailure, count: u64) {
        self.intermittent_failures.inc_by(count);
    }
}
