use std::collections::HashSet;
use std::sync::RwLock;

/// Process-wide set of addresses the scanner must flag, seeded at boot from every `onetime`
/// (or `only_read`) key plus the `fee_deposit` treasury address. Redesigned from the original's
/// `BlockScanner.WATCHED_ACCOUNTS` class attribute into explicit instance state (see DESIGN.md).
pub struct WatchedSet {
    inner: RwLock<HashSet<String>>,
}

impl WatchedSet {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashSet::new()) }
    }

    pub fn seed(&self, addresses: impl IntoIterator<Item = String>) {
        self.inner.write().unwrap().extend(addresses);
    }

    pub fn insert(&self, address: String) {
        self.inner.write().unwrap().insert(address);
    }

    pub fn contains(&self, address: &str) -> bool {
        self.inner.read().unwrap().contains(address)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WatchedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_and_contains() {
        let w = WatchedSet::new();
        w.seed(["TAddr1".to_string(), "TAddr2".to_string()]);
        assert!(w.contains("TAddr1"));
        assert!(!w.contains("TAddr3"));
        w.insert("TAddr3".to_string());
        assert!(w.contains("TAddr3"));
        assert_eq!(w.len(), 3);
    }
}
