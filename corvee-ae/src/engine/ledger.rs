//! User Assignment Ledger
//!
//! Per-user ordered log of assigned item IDs with a cursor over unresolved
//! work. `assigned_order` is append-only history: a user revisiting an
//! earlier index always gets the exact same item back, which is what makes
//! sessions resumable after a disconnect.
//!
//! Contention is naturally partitioned by user: each entry sits behind its
//! own mutex, and the outer map is only write-locked when a user is first
//! seen.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use corvee_common::{ItemId, UserId};

/// One user's assignment history
#[derive(Debug, Default)]
pub struct UserLedgerEntry {
    /// Append-only assignment log, in assignment order
    pub assigned_order: Vec<ItemId>,
    /// Membership index over `assigned_order`
    pub assigned: HashSet<ItemId>,
    /// Index of the next unresolved assignment
    pub cursor: usize,
    /// Items this user has submitted annotations for
    pub annotated: HashSet<ItemId>,
    /// Items this user skipped or lost to the reservation sweeper
    pub abandoned: HashSet<ItemId>,
}

impl UserLedgerEntry {
    fn resolved(&self, id: &ItemId) -> bool {
        self.annotated.contains(id) || self.abandoned.contains(id)
    }

    /// Move the cursor past resolved entries; never past an unresolved one
    fn advance_cursor(&mut self) {
        while self.cursor < self.assigned_order.len()
            && self.resolved(&self.assigned_order[self.cursor])
        {
            self.cursor += 1;
        }
    }

    /// Unresolved assignment at the cursor, if any
    fn pending(&self) -> Option<ItemId> {
        self.assigned_order.get(self.cursor).copied()
    }
}

/// Ledger over all users
#[derive(Default)]
pub struct Ledger {
    users: RwLock<HashMap<UserId, Arc<Mutex<UserLedgerEntry>>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user: UserId) -> Arc<Mutex<UserLedgerEntry>> {
        if let Some(entry) = self.users.read().unwrap().get(&user) {
            return entry.clone();
        }
        self.users
            .write()
            .unwrap()
            .entry(user)
            .or_default()
            .clone()
    }

    /// Unresolved already-assigned work for this user, if any
    ///
    /// Idempotent: repeated calls without an intervening outcome return the
    /// same item. `None` signals the coordinator that a new assignment is
    /// needed.
    pub fn pending(&self, user: UserId) -> Option<ItemId> {
        let entry = self.entry(user);
        let mut entry = entry.lock().unwrap();
        entry.advance_cursor();
        entry.pending()
    }

    /// Append a fresh assignment; does not advance the cursor
    pub fn append(&self, user: UserId, item: ItemId) {
        let entry = self.entry(user);
        let mut entry = entry.lock().unwrap();
        entry.assigned_order.push(item);
        entry.assigned.insert(item);
    }

    /// Record a submitted annotation and advance past the entry
    ///
    /// Returns false when the item was never assigned to this user or was
    /// already resolved.
    pub fn mark_annotated(&self, user: UserId, item: ItemId) -> bool {
        let entry = self.entry(user);
        let mut entry = entry.lock().unwrap();
        if !entry.assigned.contains(&item) || entry.resolved(&item) {
            return false;
        }
        entry.annotated.insert(item);
        entry.advance_cursor();
        true
    }

    /// Record a skip/timeout and advance past the entry
    ///
    /// The item joins `abandoned`, never `annotated`; releasing the item's
    /// in-flight slot is the coordinator's job.
    pub fn mark_abandoned(&self, user: UserId, item: ItemId) -> bool {
        let entry = self.entry(user);
        let mut entry = entry.lock().unwrap();
        if !entry.assigned.contains(&item) || entry.resolved(&item) {
            return false;
        }
        entry.abandoned.insert(item);
        entry.advance_cursor();
        true
    }

    /// All items ever assigned to this user
    pub fn assigned_snapshot(&self, user: UserId) -> HashSet<ItemId> {
        let entry = self.entry(user);
        let entry = entry.lock().unwrap();
        entry.assigned.clone()
    }

    /// Item at a historical assignment index (stable replay)
    pub fn assigned_at(&self, user: UserId, index: usize) -> Option<ItemId> {
        let entry = self.entry(user);
        let entry = entry.lock().unwrap();
        entry.assigned_order.get(index).copied()
    }

    /// (assigned, annotated) counts for this user
    pub fn progress(&self, user: UserId) -> (usize, usize) {
        let entry = self.entry(user);
        let entry = entry.lock().unwrap();
        (entry.assigned_order.len(), entry.annotated.len())
    }

    /// Number of users the ledger has seen
    pub fn user_count(&self) -> usize {
        self.users.read().unwrap().len()
    }
}
