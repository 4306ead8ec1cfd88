//! In-memory credential rotation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use helmsman_core::CredentialSource;
use tracing::warn;

/// Tier used when a provider has a single pool of keys.
pub const DEFAULT_TIER: &str = "default";

#[derive(Debug, Default)]
struct TierKeys {
    keys: Vec<String>,
    failed: HashSet<String>,
}

/// Rotates over a list of keys per tier, skipping keys the provider rejected.
#[derive(Debug, Default)]
pub struct KeyRing {
    tiers: Mutex<HashMap<String, TierKeys>>,
}

impl KeyRing {
    /// A ring with `keys` under the default tier.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self::default().with_tier(DEFAULT_TIER, keys)
    }

    /// Add (or replace) the keys for `tier`.
    pub fn with_tier(self, tier: &str, keys: impl IntoIterator<Item = String>) -> Self {
        {
            let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
            tiers.insert(
                tier.to_string(),
                TierKeys {
                    keys: keys.into_iter().filter(|k| !k.is_empty()).collect(),
                    failed: HashSet::new(),
                },
            );
        }
        self
    }

    /// Keys not yet marked failed for `tier`.
    pub fn remaining(&self, tier: &str) -> usize {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        tiers
            .get(tier)
            .map(|t| t.keys.iter().filter(|k| !t.failed.contains(*k)).count())
            .unwrap_or(0)
    }
}

impl CredentialSource for KeyRing {
    fn active_key(&self, tier: &str) -> Option<String> {
        let tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        let t = tiers.get(tier)?;
        t.keys.iter().find(|k| !t.failed.contains(*k)).cloned()
    }

    fn mark_failed(&self, key: &str, tier: &str) {
        let mut tiers = self.tiers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = tiers.get_mut(tier)
            && t.failed.insert(key.to_string())
        {
            let remaining = t.keys.len().saturating_sub(t.failed.len());
            warn!(tier, remaining, "Credential rejected, rotating");
        }
    }
}
