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

use std::sync::Mutex;

use crate::aws::{CallerIdentity, Sts, StsError};

/// MockSts answers with fixed values, failing any call whose answer is unset. Every
/// `assume_role` call is recorded as `(role, session_name)`.
#[derive(Debug, Default)]
pub struct MockSts {
    pub role_id: Option<String>,
    pub identity: Option<CallerIdentity>,
    pub assumed: Mutex<Vec<(String, String)>>,
}

#[async_trait::async_trait]
impl Sts for MockSts {
    async fn assume_role(&self, role: &str, session_name: &str) -> Result<String, StsError> {
        self.assumed
            .lock()
            .unwrap()
            .push((role.to_string(), session_name.to_string()));
        self.role_id
            .clone()
            .ok_or_else(|| StsError::Service(format!("AccessDenied: not authorized to assume {role}")))
    }

    async fn get_caller_identity(&self) -> Result<CallerIdentity, StsError> {
        self.identity
            .clone()
            .ok_or_else(|| StsError::Service("ExpiredToken: the security token has expired".to_string()))
    }
}
