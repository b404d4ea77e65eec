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

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::Error;
use crate::metrics::{IncrementRecorder, Metrics, UpstreamResult};

mod allowlist;
mod forward;

pub use allowlist::{Allowlist, is_allowed};
pub use forward::{Forward, HttpForwarder, decode_object};

/// ProxyRequest describes one upstream call made on behalf of a caller.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProxyRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataRequest {
    pub path: String,
}

/// Proxy forwards caller supplied requests to upstreams permitted by the configured allowlist.
pub struct Proxy {
    config: Arc<Config>,
    allowlist: Allowlist,
    forwarder: Arc<dyn Forward>,
    metrics: Arc<Metrics>,
}

impl Proxy {
    pub fn new(config: Arc<Config>, forwarder: Arc<dyn Forward>, metrics: Arc<Metrics>) -> Self {
        Proxy {
            config,
            allowlist: Allowlist::new(),
            forwarder,
            metrics,
        }
    }

    pub async fn proxy(&self, request: ProxyRequest) -> Result<Map<String, Value>, Error> {
        if !self.config.proxy_endpoint {
            return Err(Error::Unimplemented(
                "Proxy endpoint disabled. Enabled with ENABLE_PROXY_ENDPOINT=true",
            ));
        }
        if request.method.is_empty() {
            return Err(Error::Validation("method must not be empty".to_string()));
        }
        if request.url.is_empty() {
            return Err(Error::Validation("url must not be empty".to_string()));
        }

        let pattern = &self.config.proxy_allow_regexp;
        if !self.allowlist.is_allowed(&request.url, pattern)? {
            info!(url=%request.url, pattern, "proxy target blocked by policy");
            return Err(Error::Policy {
                url: request.url,
                pattern: pattern.clone(),
            });
        }

        debug!(method=%request.method, url=%request.url, "forwarding request");
        let res = self.forwarder.forward(&request).await;
        self.metrics.increment(&UpstreamResult {
            error: res.as_ref().err(),
        });
        if let Err(e) = &res {
            warn!(url=%request.url, kind=e.kind(), "upstream request failed: {e}");
        }
        res
    }

    /// aws_metadata fetches `path` from the configured metadata service. The request is subject to
    /// the same enablement and allowlist checks as any other proxied call.
    pub async fn aws_metadata(&self, request: MetadataRequest) -> Result<Map<String, Value>, Error> {
        if request.path.is_empty() {
            return Err(Error::Validation("path must not be empty".to_string()));
        }
        let url = metadata_url(&self.config.aws_metadata_endpoint, &request.path)?;
        self.proxy(ProxyRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            ..Default::default()
        })
        .await
    }
}

/// metadata_url places `path` beneath the path of `base`, keeping its scheme, authority and query.
pub fn metadata_url(base: &str, path: &str) -> Result<Url, Error> {
    let invalid =
        |reason: String| Error::Config(format!("AWS metadata endpoint {base} invalid: {reason}"));
    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("not a hierarchical URL".to_string()));
    }
    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Ok(url)
}
