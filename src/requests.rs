use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Page indices with an outstanding decode request. Membership is the only
/// thing that suppresses duplicate dispatch; replies for indices that are no
/// longer tracked are dropped by the controller.
#[derive(Debug, Default)]
pub struct RequestTracker {
    members: HashMap<usize, Instant>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `index`. Returns `false` when it was already in flight, in
    /// which case the caller must not dispatch again.
    pub fn add_request(&mut self, index: usize) -> bool {
        if self.members.contains_key(&index) {
            return false;
        }
        self.members.insert(index, Instant::now());
        true
    }

    /// Stops tracking `index`. Returns whether it was tracked.
    pub fn del_request(&mut self, index: usize) -> bool {
        self.members.remove(&index).is_some()
    }

    pub fn has_request(&self, index: usize) -> bool {
        self.members.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.members.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Forgets every request older than `timeout` and returns the indices
    /// removed, lowest first.
    pub fn expire(&mut self, timeout: Duration) -> Vec<usize> {
        self.expire_at(Instant::now(), timeout)
    }

    fn expire_at(&mut self, now: Instant, timeout: Duration) -> Vec<usize> {
        let mut expired: Vec<usize> = self
            .members
            .iter()
            .filter(|(_, requested_at)| now.duration_since(**requested_at) >= timeout)
            .map(|(&index, _)| index)
            .collect();
        for index in &expired {
            self.members.remove(index);
        }
        expired.sort_unstable();
        expired
    }
}
