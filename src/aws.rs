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

/// Session name used for every AssumeRole call.
pub const ASSUME_ROLE_SESSION_NAME: &str = "aws-assume-session-infrabin";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(thiserror::Error, Debug)]
pub enum StsError {
    #[error("no STS client configured")]
    Unconfigured,
    #[error("{0}")]
    Service(String),
}

/// Sts is the subset of the AWS Security Token Service the AWS endpoints rely on.
#[async_trait::async_trait]
pub trait Sts: Send + Sync {
    /// assume_role assumes `role` and returns the assumed role ID.
    async fn assume_role(&self, role: &str, session_name: &str) -> Result<String, StsError>;

    async fn get_caller_identity(&self) -> Result<CallerIdentity, StsError>;
}

/// Unconfigured is used when no STS client has been provided; every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconfigured;

#[async_trait::async_trait]
impl Sts for Unconfigured {
    async fn assume_role(&self, _role: &str, _session_name: &str) -> Result<String, StsError> {
        Err(StsError::Unconfigured)
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, StsError> {
        Err(StsError::Unconfigured)
    }
}
