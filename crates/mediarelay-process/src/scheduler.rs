//! Deadline-ordered escalation entries

use std::collections::{BTreeSet, HashMap};

use tokio::time::Instant;

use crate::info::ProcessId;

/// Pending escalation entries, at most one per process
///
/// Entries are ordered by deadline, ties broken by process id. The manager
/// keeps this behind the same lock as the process registry.
#[derive(Debug, Default)]
pub struct TerminationScheduler {
    queue: BTreeSet<(Instant, ProcessId)>,
    deadlines: HashMap<ProcessId, Instant>,
}

impl TerminationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, or move an existing one earlier
    ///
    /// Returns `true` if the queue changed. A later deadline never replaces an
    /// earlier one.
    pub fn schedule(&mut self, deadline: Instant, id: ProcessId) -> bool {
        match self.deadlines.get(&id) {
            Some(current) if *current <= deadline => false,
            Some(current) => {
                self.queue.remove(&(*current, id));
                self.queue.insert((deadline, id));
                self.deadlines.insert(id, deadline);
                true
            }
            None => {
                self.queue.insert((deadline, id));
                self.deadlines.insert(id, deadline);
                true
            }
        }
    }

    /// Drop the pending entry for `id`
    pub fn cancel(&mut self, id: ProcessId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.queue.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    /// Remove and return every entry due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<ProcessId> {
        let mut due = Vec::new();
        while let Some(&(deadline, id)) = self.queue.first() {
            if deadline > now {
                break;
            }
            self.queue.pop_first();
            self.deadlines.remove(&id);
            due.push(id);
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.first().map(|(deadline, _)| *deadline)
    }

    pub fn deadline_of(&self, id: ProcessId) -> Option<Instant> {
        self.deadlines.get(&id).copied()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
