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

use crate::error::Error;

/// Source is a read-only key/value view of the process environment.
///
/// Lookups go through this trait rather than `std::env` directly so handlers and configuration
/// parsing can be exercised against a fixed map.
pub trait Source: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// ProcessEnv reads the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl Source for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Source for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// lookup returns the value of the first key in `keys` that is set to a non-empty value,
/// falling back to `default`.
pub fn lookup(source: &dyn Source, keys: &[&str], default: &str) -> String {
    keys.iter()
        .filter_map(|k| source.get(k))
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub fn hostname() -> Result<String, Error> {
    nix::unistd::gethostname()
        .map_err(|e| Error::Internal(format!("cannot get hostname: {e}")))?
        .into_string()
        .map_err(|h| Error::Internal(format!("hostname is not valid utf-8: {h:?}")))
}

/// KubeInfo is the cluster placement of this process, taken from a couple of _common_
/// environment variables.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeInfo {
    pub pod_name: String,
    pub namespace: String,
    pub pod_ip: String,
    pub node_name: String,
    pub cluster_name: String,
    pub region: String,
}

impl KubeInfo {
    pub fn from_source(source: &dyn Source) -> Self {
        KubeInfo {
            pod_name: lookup(source, &["POD_NAME", "K8S_POD_NAME"], ""),
            namespace: lookup(source, &["POD_NAMESPACE", "K8S_NAMESPACE"], ""),
            pod_ip: lookup(source, &["POD_IP", "K8S_POD_IP"], ""),
            node_name: lookup(source, &["NODE_NAME", "K8S_NODE_NAME"], ""),
            cluster_name: lookup(source, &["CLUSTER_NAME", "K8S_CLUSTER_NAME"], ""),
            region: lookup(source, &["REGION", "AWS_REGION", "FUNCTION_REGION"], ""),
        }
    }
}
