//! Per-subscription polling checkpoint.
//!
//! Dedup is keyed on the server's sync hash and the email ids of the last
//! listing, never on timestamps. A hash equal to the last observed one
//! means no listing is fetched and nothing is emitted.
//!
//! Memory is bounded by the inbox size: after each listing only the listed
//! ids are kept, plus seeded ids the listing has not caught up with yet.

use std::collections::HashSet;

use sandmail_proto::{EmailId, SyncState};

/// What one polling subscription has already seen.
#[derive(Debug, Clone, Default)]
pub struct PollCheckpoint {
    last_hash: Option<String>,
    /// Ids in the last listing
    seen: HashSet<EmailId>,
    /// Ids reported elsewhere that no listing has shown yet
    seeded: HashSet<EmailId>,
    primed: bool,
}

impl PollCheckpoint {
    /// Checkpoint for a new subscription.
    ///
    /// The first observation records the server's current contents as the
    /// baseline and reports nothing.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Checkpoint that continues from ids already reported elsewhere.
    ///
    /// The first observation reports every listed id not in `seen`.
    pub fn seeded(seen: impl IntoIterator<Item = EmailId>) -> Self {
        Self {
            last_hash: None,
            seen: HashSet::new(),
            seeded: seen.into_iter().collect(),
            primed: true,
        }
    }

    /// Whether `sync` differs from the last observed state.
    pub fn needs_listing(&self, sync: &SyncState) -> bool {
        self.last_hash.as_deref() != Some(sync.emails_hash.as_str())
    }

    /// Last observed sync hash.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Whether `id` has been reported or baselined.
    pub fn has_seen(&self, id: &EmailId) -> bool {
        self.seen.contains(id) || self.seeded.contains(id)
    }

    /// Number of ids currently remembered.
    pub fn tracked(&self) -> usize {
        self.seen.len() + self.seeded.len()
    }

    /// Record a listing taken at `sync_hash` and return the ids that are new.
    ///
    /// New ids keep listing order. A seeded id stays remembered until a
    /// listing shows it, so an email reported over another path before the
    /// listing caught up is never reported twice. Ids that drop out of the
    /// listing are forgotten.
    pub fn observe(&mut self, sync_hash: &str, listed: &[EmailId]) -> Vec<EmailId> {
        let mut current = HashSet::with_capacity(listed.len());
        let mut new_ids = Vec::new();
        for id in listed {
            if !current.insert(id.clone()) {
                continue;
            }
            let known = self.seen.contains(id) || self.seeded.remove(id);
            if !known && self.primed {
                new_ids.push(id.clone());
            }
        }
        self.seen = current;
        self.last_hash = Some(sync_hash.to_string());
        self.primed = true;

        new_ids
    }
}
