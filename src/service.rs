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
use std::sync::Arc;
use std::time::Duration;

use hyper::HeaderMap;
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::debug;

use crate::aws::{self, CallerIdentity, Sts};
use crate::config::Config;
use crate::environment::{self, KubeInfo, Source};
use crate::error::Error;
use crate::intermittent::Intermittent;
use crate::metrics::{IncrementRecorder, IntermittentFailure, Metrics};
use crate::proxy::{Forward, MetadataRequest, Proxy, ProxyRequest};

/// Response is shared by every endpoint that does not return an upstream body. Only the fields
/// relevant to the endpoint are set.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<KubeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assumed_role_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_caller_identity: Option<CallerIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intermittent: Option<IntermittentResponse>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IntermittentResponse {
    pub intermittent_errors: u32,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct HeadersRequest {
    pub headers: HashMap<String, String>,
}

/// InfrabinService implements every endpoint. One instance is shared by all connections, so the
/// intermittent countdown is shared too.
pub struct InfrabinService {
    config: Arc<Config>,
    env: Arc<dyn Source>,
    proxy: Proxy,
    sts: Arc<dyn Sts>,
    intermittent: Intermittent,
    metrics: Arc<Metrics>,
}

impl InfrabinService {
    pub fn new(
        config: Arc<Config>,
        env: Arc<dyn Source>,
        forwarder: Arc<dyn Forward>,
        sts: Arc<dyn Sts>,
        metrics: Arc<Metrics>,
    ) -> Self {
        InfrabinService {
            proxy: Proxy::new(config.clone(), forwarder, metrics.clone()),
            config,
            env,
            sts,
            intermittent: Intermittent::new(),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn root(&self) -> Result<Response, Error> {
        if self.config.fail_root_handler {
            return Err(Error::Unavailable(
                "root handler failing as FAIL_ROOT_HANDLER is set".to_string(),
            ));
        }
        Ok(Response {
            hostname: Some(environment::hostname()?),
            kubernetes: Some(KubeInfo::from_source(self.env.as_ref())),
            ..Default::default()
        })
    }

    /// delay sleeps for the requested number of seconds, capped at the configured maximum, and
    /// reports the whole seconds actually slept.
    pub async fn delay(&self, seconds: i64) -> Result<Response, Error> {
        let requested = u64::try_from(seconds)
            .map(Duration::from_secs)
            .map_err(|_| Error::Validation(format!("duration must not be negative, got {seconds}")))?;
        let duration = requested.min(self.config.max_delay);
        debug!(?duration, "delaying response");
        tokio::time::sleep(duration).await;
        Ok(Response {
            delay: Some(duration.as_secs()),
            ..Default::default()
        })
    }

    pub fn env(&self, name: &str) -> Result<Response, Error> {
        let value = environment::lookup(self.env.as_ref(), &[name], "");
        if value.is_empty() {
            return Err(Error::NotFound(format!("No env var named {name}")));
        }
        Ok(Response {
            env: Some(HashMap::from([(name.to_string(), value)])),
            ..Default::default()
        })
    }

    /// headers echoes the caller supplied headers merged with the headers the request arrived
    /// with. Repeated inbound headers are joined with `,`.
    pub fn headers(&self, request: HeadersRequest, inbound: &HeaderMap) -> Response {
        let mut headers = request.headers;
        for name in inbound.keys() {
            let joined = inbound
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()))
                .join(",");
            headers.insert(name.as_str().to_string(), joined);
        }
        Response {
            headers: Some(headers),
            ..Default::default()
        }
    }

    pub async fn proxy(&self, request: ProxyRequest) -> Result<Map<String, Value>, Error> {
        self.proxy.proxy(request).await
    }

    pub async fn aws_metadata(&self, request: MetadataRequest) -> Result<Map<String, Value>, Error> {
        self.proxy.aws_metadata(request).await
    }

    pub fn any(&self, path: &str) -> Response {
        Response {
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    pub async fn aws_assume(&self, role: &str) -> Result<Response, Error> {
        if role.is_empty() {
            return Err(Error::Validation("role must not be empty".to_string()));
        }
        let id = self
            .sts
            .assume_role(role, aws::ASSUME_ROLE_SESSION_NAME)
            .await
            .map_err(|e| Error::Identity(format!("Error assuming AWS IAM role, {e}")))?;
        Ok(Response {
            assumed_role_id: Some(id),
            ..Default::default()
        })
    }

    pub async fn aws_get_caller_identity(&self) -> Result<Response, Error> {
        let identity = self
            .sts
            .get_caller_identity()
            .await
            .map_err(|e| Error::Identity(format!("Error calling AWS Get Caller Identity, {e}")))?;
        Ok(Response {
            get_caller_identity: Some(identity),
            ..Default::default()
        })
    }

    pub fn intermittent(&self) -> Result<Response, Error> {
        let errors = self
            .intermittent
            .invoke(self.config.intermittent_errors)
            .inspect_err(|_| self.metrics.increment(&IntermittentFailure))?;
        Ok(Response {
            intermittent: Some(IntermittentResponse {
                intermittent_errors: errors,
            }),
            ..Default::default()
        })
    }
}
