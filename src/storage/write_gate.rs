use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How writes to backing files are serialized.
///
/// `Global` runs every write in the process one at a time, across all files.
/// That is the default and a known throughput ceiling for multi-file write
/// loads; `PerFile` only serializes writes that target the same file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteLockPolicy {
    #[default]
    Global,
    PerFile,
}

/// Write serialization point owned by the file store.
#[derive(Debug)]
pub struct WriteGate {
    policy: WriteLockPolicy,
    global: Arc<Mutex<()>>,
    per_file: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WriteGate {
    pub fn new(policy: WriteLockPolicy) -> Self {
        Self { policy, global: Arc::new(Mutex::new(())), per_file: parking_lot::Mutex::new(HashMap::new()) }
    }

    pub fn policy(&self) -> WriteLockPolicy { self.policy }

    /// Wait for the right to write `name`. Held until the guard drops.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = match self.policy {
            WriteLockPolicy::Global => self.global.clone(),
            WriteLockPolicy::PerFile => self.per_file.lock().entry(name.to_string()).or_default().clone(),
        };
        lock.lock_owned().await
    }

    /// Drop the per-file lock of a file that left the data directory.
    pub fn forget(&self, name: &str) {
        if self.policy == WriteLockPolicy::PerFile {
            self.per_file.lock().remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn global_policy_blocks_other_files() {
        let gate = WriteGate::new(WriteLockPolicy::Global);
        let _a = gate.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), gate.acquire("b")).await;
        assert!(b.is_err());
    }

    #[tokio::test]
    async fn per_file_policy_only_blocks_same_name() {
        let gate = WriteGate::new(WriteLockPolicy::PerFile);
        let _a = gate.acquire("a").await;
        assert!(tokio::time::timeout(Duration::from_millis(50), gate.acquire("b")).await.is_ok());
        assert!(tokio::time::timeout(Duration::from_millis(50), gate.acquire("a")).await.is_err());
    }
}
