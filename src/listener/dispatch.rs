//! The dispatch table: ordered accept callbacks plus NAPI affinity.

use crate::event_loop::{same_loop, EventLoop};
use crate::listener::acceptor::RemoteAcceptor;
use crate::listener::callback::AcceptCallback;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered callback: the sink, its declared target loop, and the
/// remote acceptor when the target differs from the primary loop.
pub(crate) struct DispatchTarget {
    pub(crate) callback: Arc<dyn AcceptCallback>,
    pub(crate) target: Option<Arc<dyn EventLoop>>,
    pub(crate) acceptor: Option<Arc<RemoteAcceptor>>,
}

impl Clone for DispatchTarget {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            target: self.target.as_ref().map(Arc::clone),
            acceptor: self.acceptor.as_ref().map(Arc::clone),
        }
    }
}

fn matches(
    entry: &DispatchTarget,
    callback: &Arc<dyn AcceptCallback>,
    target: Option<&Arc<dyn EventLoop>>,
) -> bool {
    if !Arc::ptr_eq(&entry.callback, callback) {
        return false;
    }
    match target {
        None => true,
        Some(wanted) => entry
            .target
            .as_ref()
            .is_some_and(|t| same_loop(t, wanted)),
    }
}

/// Ordered callbacks with a round-robin cursor, a NAPI-id affinity map,
/// and the recorded index of the first primary-loop callback.
pub(crate) struct DispatchTable {
    entries: Vec<DispatchTarget>,
    cursor: usize,
    napi: HashMap<u32, DispatchTarget>,
    local_index: Option<usize>,
}

impl DispatchTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            napi: HashMap::new(),
            local_index: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn push(&mut self, entry: DispatchTarget) {
        self.entries.push(entry);
    }

    pub(crate) fn pop_last(&mut self) {
        self.entries.pop();
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
    }

    pub(crate) fn set_consumer(&mut self, index: usize, acceptor: Arc<RemoteAcceptor>) {
        self.entries[index].acceptor = Some(acceptor);
    }

    /// Returns the entry at the cursor and advances the cursor.
    ///
    /// Callers must check [`is_empty`](Self::is_empty) first.
    pub(crate) fn next(&mut self) -> DispatchTarget {
        let entry = self.entries[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.entries.len();
        entry
    }

    /// Linear search for the `(callback, target)` pair; a `None` target
    /// matches any entry with that callback.
    pub(crate) fn find(
        &self,
        callback: &Arc<dyn AcceptCallback>,
        target: Option<&Arc<dyn EventLoop>>,
    ) -> Option<usize> {
        self.entries.iter().position(|e| matches(e, callback, target))
    }

    /// Removes the entry at `index` and repairs the cursor: removals
    /// before the cursor shift it back one step; a cursor left past the
    /// end resets to zero.
    pub(crate) fn remove(&mut self, index: usize) -> DispatchTarget {
        let removed = self.entries.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        } else if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
        removed
    }

    /// Swaps the table contents out for teardown, resetting the cursor
    /// and clearing the NAPI map and the local-callback index.
    pub(crate) fn take(&mut self) -> Vec<DispatchTarget> {
        self.cursor = 0;
        self.napi.clear();
        self.local_index = None;
        std::mem::take(&mut self.entries)
    }

    /// Records `entry` as the latest mapping for a NAPI id.
    pub(crate) fn insert_napi(&mut self, napi_id: u32, entry: DispatchTarget) {
        self.napi.insert(napi_id, entry);
    }

    pub(crate) fn set_napi_consumer(&mut self, napi_id: u32, acceptor: Arc<RemoteAcceptor>) {
        if let Some(entry) = self.napi.get_mut(&napi_id) {
            entry.acceptor = Some(acceptor);
        }
    }

    pub(crate) fn napi_lookup(&self, napi_id: u32) -> Option<DispatchTarget> {
        self.napi.get(&napi_id).cloned()
    }

    pub(crate) fn remove_napi(&mut self, napi_id: u32) {
        self.napi.remove(&napi_id);
    }

    /// Removes every NAPI mapping matching the `(callback, target)` pair.
    pub(crate) fn remove_napi_matching(
        &mut self,
        callback: &Arc<dyn AcceptCallback>,
        target: Option<&Arc<dyn EventLoop>>,
    ) {
        self.napi.retain(|_, entry| !matches(entry, callback, target));
    }

    pub(crate) fn local_index(&self) -> Option<usize> {
        self.local_index
    }

    pub(crate) fn set_local_index(&mut self, index: usize) {
        self.local_index = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::listener::callback::AcceptInfo;
    use crate::sock::Address;
    use std::os::fd::OwnedFd;

    struct NullCallback;

    impl AcceptCallback for NullCallback {
        fn connection_accepted(&self, _conn: OwnedFd, _peer: Address, _info: AcceptInfo) {}
        fn accept_error(&self, _error: Error) {}
    }

    fn callback() -> Arc<dyn AcceptCallback> {
        Arc::new(NullCallback)
    }

    fn entry(callback: &Arc<dyn AcceptCallback>) -> DispatchTarget {
        DispatchTarget {
            callback: Arc::clone(callback),
            target: None,
            acceptor: None,
        }
    }

    fn table_with(callbacks: &[Arc<dyn AcceptCallback>]) -> DispatchTable {
        let mut table = DispatchTable::new();
        for cb in callbacks {
            table.push(entry(cb));
        }
        table
    }

    #[test]
    fn next_rotates_round_robin() {
        let callbacks: Vec<_> = (0..3).map(|_| callback()).collect();
        let mut table = table_with(&callbacks);

        for expected in [0usize, 1, 2, 0] {
            let picked = table.next();
            assert!(Arc::ptr_eq(&picked.callback, &callbacks[expected]));
        }
        assert_eq!(table.cursor(), 1);
    }

    #[test]
    fn removal_before_cursor_shifts_cursor_back() {
        let callbacks: Vec<_> = (0..3).map(|_| callback()).collect();
        let mut table = table_with(&callbacks);
        table.next();
        table.next();
        assert_eq!(table.cursor(), 2);

        table.remove(0);
        assert_eq!(table.cursor(), 1);
        // Cursor still points at the entry it pointed at before removal.
        assert!(Arc::ptr_eq(&table.next().callback, &callbacks[2]));
    }

    #[test]
    fn removal_at_cursor_keeps_cursor() {
        let callbacks: Vec<_> = (0..3).map(|_| callback()).collect();
        let mut table = table_with(&callbacks);
        table.next();
        assert_eq!(table.cursor(), 1);

        table.remove(1);
        assert_eq!(table.cursor(), 1);
        assert!(Arc::ptr_eq(&table.next().callback, &callbacks[2]));
    }

    #[test]
    fn removal_after_cursor_can_reset_to_zero() {
        let callbacks: Vec<_> = (0..3).map(|_| callback()).collect();
        let mut table = table_with(&callbacks);
        table.next();
        table.next();
        assert_eq!(table.cursor(), 2);

        table.remove(2);
        assert_eq!(table.cursor(), 0);
        assert!(Arc::ptr_eq(&table.next().callback, &callbacks[0]));
    }

    #[test]
    fn removal_after_cursor_leaves_cursor_alone() {
        let callbacks: Vec<_> = (0..3).map(|_| callback()).collect();
        let mut table = table_with(&callbacks);
        table.next();
        assert_eq!(table.cursor(), 1);

        table.remove(2);
        assert_eq!(table.cursor(), 1);
        assert!(Arc::ptr_eq(&table.next().callback, &callbacks[1]));
    }

    #[test]
    fn removal_of_only_element_resets_cursor() {
        let cb = callback();
        let mut table = table_with(std::slice::from_ref(&cb));
        table.next();
        table.remove(0);
        assert!(table.is_empty());
        assert_eq!(table.cursor(), 0);
    }

    #[test]
    fn find_with_none_target_matches_any_entry() {
        let a = callback();
        let b = callback();
        let table = table_with(&[a.clone(), b.clone()]);
        assert_eq!(table.find(&b, None), Some(1));
        assert_eq!(table.find(&callback(), None), None);
    }

    #[test]
    fn napi_map_records_latest_insertion() {
        let a = callback();
        let b = callback();
        let mut table = DispatchTable::new();
        table.insert_napi(4, entry(&a));
        table.insert_napi(4, entry(&b));
        let hit = table.napi_lookup(4).expect("mapping");
        assert!(Arc::ptr_eq(&hit.callback, &b));

        table.remove_napi_matching(&b, None);
        assert!(table.napi_lookup(4).is_none());
    }

    #[test]
    fn take_clears_everything() {
        let a = callback();
        let mut table = table_with(&[a.clone()]);
        table.insert_napi(1, entry(&a));
        table.set_local_index(0);
        table.next();

        let drained = table.take();
        assert_eq!(drained.len(), 1);
        assert!(table.is_empty());
        assert_eq!(table.cursor(), 0);
        assert!(table.napi_lookup(1).is_none());
        assert!(table.local_index().is_none());
    }
}
