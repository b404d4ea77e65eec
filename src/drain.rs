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

use tokio::sync::{mpsc, watch};

/// new constructs a pair for draining:
/// * DrainTrigger starts a drain and waits for every watcher to finish.
/// * DrainWatcher is held by each server; a drain does not complete until every clone of it (and
///   every DrainBlocker obtained from it) is dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
    let (signal_tx, signal_rx) = watch::channel(false);
    let (drained_tx, drained_rx) = mpsc::channel(1);
    (
        DrainTrigger {
            signal_tx,
            drained_rx,
        },
        DrainWatcher {
            signal_rx,
            drained_tx,
        },
    )
}

enum Never {}

pub struct DrainTrigger {
    signal_tx: watch::Sender<bool>,
    drained_rx: mpsc::Receiver<Never>,
}

impl DrainTrigger {
    /// start_drain_and_wait notifies all watchers and resolves once every handle is released.
    pub async fn start_drain_and_wait(mut self) {
        let _ = self.signal_tx.send(true);
        match self.drained_rx.recv().await {
            None => {}
            Some(n) => match n {},
        }
    }
}

#[derive(Clone)]
pub struct DrainWatcher {
    signal_rx: watch::Receiver<bool>,
    drained_tx: mpsc::Sender<Never>,
}

/// DrainBlocker holds up a drain until it is dropped.
#[must_use = "DrainBlocker should be dropped once the component has shut down"]
pub struct DrainBlocker(#[allow(dead_code)] mpsc::Sender<Never>);

impl DrainWatcher {
    /// wait_for_drain resolves once a drain is signaled. If the trigger is dropped without
    /// signaling, this is treated as a drain as well.
    pub async fn wait_for_drain(mut self) -> DrainBlocker {
        let _ = self.signal_rx.wait_for(|draining| *draining).await;
        DrainBlocker(self.drained_tx)
    }
}

impl std::fmt::Debug for DrainTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainTrigger").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for DrainWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrainWatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn drain_waits_for_blockers() {
        let (trigger, watcher) = new();
        let (done_tx, mut done_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let blocker = watcher.wait_for_drain().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = done_tx.send(());
            drop(blocker);
        });
        trigger.start_drain_and_wait().await;
        assert!(done_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn drain_without_watchers_completes() {
        let (trigger, watcher) = new();
        drop(watcher);
        tokio::time::timeout(Duration::from_secs(1), trigger.start_drain_and_wait())
            .await
            .unwrap();
    }
}
