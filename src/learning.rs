use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::packet::MacAddr;

/// Per-switch map from host MAC address to the port it was last seen on.
///
/// Entries are only ever overwritten, never expired or removed, and outlive
/// the connections of the switches they were learned on. A host that moves is
/// relearned the next time it sends.
#[derive(Debug, Default)]
pub struct LearningTable {
    known_hosts: HashMap<(u64, MacAddr), u16>,
}

impl LearningTable {
    pub fn new() -> LearningTable {
        LearningTable::default()
    }

    /// Remember that `mac` sits behind `port` of switch `sw`.
    pub fn record(&mut self, sw: u64, mac: MacAddr, port: u16) {
        if let Some(old) = self.known_hosts.insert((sw, mac), port) {
            if old != port {
                debug!("host {} moved from port {} to {} on switch {:#x}", mac, old, port, sw);
            }
        }
    }

    /// The port `mac` was last seen on, if it has been seen on switch `sw` at all.
    pub fn lookup(&self, sw: u64, mac: MacAddr) -> Option<u16> {
        self.known_hosts.get(&(sw, mac)).cloned()
    }

    pub fn len(&self) -> usize {
        self.known_hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_hosts.is_empty()
    }
}

/// The learning table of the whole controller, shared by every switch connection.
#[derive(Clone, Debug, Default)]
pub struct SharedLearningTable(Arc<Mutex<LearningTable>>);

impl SharedLearningTable {
    pub fn new() -> SharedLearningTable {
        SharedLearningTable::default()
    }

    /// Lock the table. Every update is a single insert, so a table left behind
    /// by a panicking holder is still consistent and is used as is.
    pub fn lock(&self) -> MutexGuard<'_, LearningTable> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tests::mac;

    #[test]
    fn unknown_until_recorded() {
        let mut table = LearningTable::new();
        assert_eq!(table.lookup(1, mac(2)), None);
        table.record(1, mac(2), 4);
        assert_eq!(table.lookup(1, mac(2)), Some(4));
    }

    #[test]
    fn recording_is_idempotent() {
        let mut table = LearningTable::new();
        for _ in 0..3 {
            table.record(1, mac(2), 4);
        }
        assert_eq!(table.lookup(1, mac(2)), Some(4));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn last_write_wins() {
        let mut table = LearningTable::new();
        table.record(1, mac(2), 4);
        table.record(1, mac(2), 7);
        assert_eq!(table.lookup(1, mac(2)), Some(7));
    }

    #[test]
    fn scoped_per_switch() {
        let mut table = LearningTable::new();
        table.record(1, mac(2), 4);
        table.record(2, mac(2), 9);
        assert_eq!(table.lookup(1, mac(2)), Some(4));
        assert_eq!(table.lookup(2, mac(2)), Some(9));
        assert_eq!(table.lookup(3, mac(2)), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn shared_handles_see_one_table() {
        let table = SharedLearningTable::new();
        let other = table.clone();
        table.lock().record(1, mac(2), 4);
        assert_eq!(other.lock().lookup(1, mac(2)), Some(4));
    }

    #[test]
    fn survives_a_panicking_holder() {
        let table = SharedLearningTable::new();
        table.lock().record(1, mac(2), 4);
        let poisoner = table.clone();
        let _ = std::thread::spawn(move || {
                let _guard = poisoner.lock();
                panic!("connection thread died");
            })
            .join();
        assert_eq!(table.lock().lookup(1, mac(2)), Some(4));
    }
}
