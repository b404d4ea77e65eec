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

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::environment::{self, Source};

const SERVER_ADDR: &str = "SERVER_ADDR";
const ADMIN_ADDR: &str = "ADMIN_ADDR";
const STATS_ADDR: &str = "STATS_ADDR";
const ENABLE_PROXY_ENDPOINT: &str = "ENABLE_PROXY_ENDPOINT";
const PROXY_ALLOW_REGEXP: &str = "PROXY_ALLOW_REGEXP";
const PROXY_TIMEOUT: &str = "PROXY_TIMEOUT";
const AWS_METADATA_ENDPOINT: &str = "AWS_METADATA_ENDPOINT";
const INTERMITTENT_ERRORS: &str = "INTERMITTENT_ERRORS";
const MAX_DELAY: &str = "MAX_DELAY";
const TERMINATION_GRACE_PERIOD: &str = "TERMINATION_GRACE_PERIOD";
const INFRABIN_WORKER_THREADS: &str = "INFRABIN_WORKER_THREADS";
const FAIL_ROOT_HANDLER: &str = "FAIL_ROOT_HANDLER";

const DEFAULT_SERVER_PORT: u16 = 8888;
const DEFAULT_ADMIN_PORT: u16 = 8899;
const DEFAULT_STATS_PORT: u16 = 8887;
const DEFAULT_WORKER_THREADS: usize = 2;
const DEFAULT_ALLOW_REGEXP: &str = ".*";
const DEFAULT_AWS_METADATA_ENDPOINT: &str = "http://169.254.169.254/latest/meta-data/";
const DEFAULT_INTERMITTENT_ERRORS: u32 = 2;
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);
const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DRAIN_DURATION: Duration = Duration::from_secs(5);

#[derive(serde::Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub server_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub stats_addr: SocketAddr,

    /// If false, the proxy and AWS metadata endpoints reject every call.
    pub proxy_endpoint: bool,
    /// Regexp a proxy target URL must contain a match of.
    pub proxy_allow_regexp: String,
    /// Total deadline for a single upstream proxy call.
    pub proxy_timeout: Duration,
    /// Base URL of the AWS instance metadata service.
    pub aws_metadata_endpoint: String,

    /// Number of consecutive failures the intermittent endpoint returns before a success.
    pub intermittent_errors: u32,
    /// Upper bound on the delay endpoint.
    pub max_delay: Duration,
    /// If true, the root endpoint fails every call.
    pub fail_root_handler: bool,

    pub termination_grace_period: Duration,

    /// Specify the number of worker threads the Tokio Runtime will use.
    pub num_worker_threads: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid env var {0}={1}")]
    EnvVar(String, String),
}

/// GoDuration wraps a Duration to accept golang style durations such as `90s` or `2m`.
struct GoDuration(Duration);

impl FromStr for GoDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        duration_str::parse(s)
            .map(GoDuration)
            .map_err(|e| e.to_string())
    }
}

fn parse<T: FromStr>(env: &dyn Source, key: &str) -> Result<Option<T>, Error> {
    match env.get(key) {
        Some(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::EnvVar(key.to_string(), val)),
        None => Ok(None),
    }
}

fn parse_default<T: FromStr>(env: &dyn Source, key: &str, default: T) -> Result<T, Error> {
    parse(env, key).map(|v| v.unwrap_or(default))
}

fn parse_duration(env: &dyn Source, key: &str, default: Duration) -> Result<Duration, Error> {
    Ok(parse::<GoDuration>(env, key)?.map(|d| d.0).unwrap_or(default))
}

pub fn parse_config() -> Result<Config, Error> {
    construct_config(&environment::ProcessEnv)
}

pub fn construct_config(env: &dyn Source) -> Result<Config, Error> {
    Ok(Config {
        server_addr: parse_default(
            env,
            SERVER_ADDR,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_SERVER_PORT),
        )?,
        admin_addr: parse_default(
            env,
            ADMIN_ADDR,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_ADMIN_PORT),
        )?,
        stats_addr: parse_default(
            env,
            STATS_ADDR,
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), DEFAULT_STATS_PORT),
        )?,

        proxy_endpoint: parse_default(env, ENABLE_PROXY_ENDPOINT, false)?,
        // An invalid regexp is deliberately not rejected here; every proxy call reports it instead.
        proxy_allow_regexp: parse_default(
            env,
            PROXY_ALLOW_REGEXP,
            DEFAULT_ALLOW_REGEXP.to_string(),
        )?,
        proxy_timeout: parse_duration(env, PROXY_TIMEOUT, DEFAULT_PROXY_TIMEOUT)?,
        aws_metadata_endpoint: parse_default(
            env,
            AWS_METADATA_ENDPOINT,
            DEFAULT_AWS_METADATA_ENDPOINT.to_string(),
        )?,

        intermittent_errors: parse_default(env, INTERMITTENT_ERRORS, DEFAULT_INTERMITTENT_ERRORS)?,
        max_delay: parse_duration(env, MAX_DELAY, DEFAULT_MAX_DELAY)?,
        fail_root_handler: env.get(FAIL_ROOT_HANDLER).is_some_and(|v| !v.is_empty()),

        termination_grace_period: parse_duration(
            env,
            TERMINATION_GRACE_PERIOD,
            DEFAULT_DRAIN_DURATION,
        )?,
        num_worker_threads: parse_default(env, INFRABIN_WORKER_THREADS, DEFAULT_WORKER_THREADS)?,
    })
}
