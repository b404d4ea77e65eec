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
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::config::{self, Config};

pub mod app;
pub mod helpers;
pub mod sts;
pub mod upstream;

/// test_config is the default configuration with every server on an ephemeral localhost port
/// and the proxy endpoint enabled.
pub fn test_config() -> Config {
    let localhost = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    Config {
        server_addr: localhost,
        admin_addr: localhost,
        stats_addr: localhost,
        proxy_endpoint: true,
        ..config::construct_config(&HashMap::new()).expect("default config must be valid")
    }
}
