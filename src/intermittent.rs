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

use tracing::debug;

use crate::error::Error;

/// Intermittent fails a configurable number of consecutive calls before letting one through, then
/// starts over. It is used to exercise callers' retry logic.
///
/// The counter is shared by every caller of one service instance. Updates are serialized, so
/// concurrent callers observe the same countdown sequential callers would.
#[derive(Debug, Default)]
pub struct Intermittent {
    counter: Mutex<u32>,
}

impl Intermittent {
    pub fn new() -> Self {
        Self::default()
    }

    /// invoke fails while fewer than `threshold` failures have been returned since the last
    /// success, reporting how many failures remain including this one. Otherwise it resets and
    /// returns `threshold`.
    ///
    /// `threshold` is taken per call so a changed configuration applies immediately; a threshold of
    /// 0 always succeeds.
    pub fn invoke(&self, threshold: u32) -> Result<u32, Error> {
        let mut counter = self.counter.lock().expect("mutex");
        if *counter < threshold {
            *counter += 1;
            let remaining = threshold - *counter + 1;
            debug!(remaining, threshold, "injecting intermittent failure");
            return Err(Error::Intermittent { remaining });
        }
        *counter = 0;
        Ok(threshold)
    }

    pub fn counter(&self) -> u32 {
        *self.counter.lock().expect("mutex")
    }
}
