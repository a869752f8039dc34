//! Task registry
//!
//! Owns every live task's bookkeeping, keyed by transport task id. Entries
//! are created on first sighting and finalized on removal; removal is
//! idempotent so duplicate completion callbacks are harmless.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::BodyDelivery;
use crate::identity::RequestIdentityTable;
use crate::observation::ObservationToken;
use crate::transport::{HttpRequest, HttpResponse, TaskId};

/// What to do with an incoming body chunk
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkDecision {
    /// Emit this chunk now
    Emit,
    /// Kept for a single flush on completion
    Buffered,
    /// Over the cap (now or earlier); nothing is emitted
    Suppressed,
}

/// Per-task response body accounting
#[derive(Debug, Default)]
pub struct BodyCapture {
    captured_bytes: u64,
    exceeds_limit: bool,
    pending: Vec<u8>,
}

impl BodyCapture {
    /// Account for `chunk` against `max_bytes` and decide how it is delivered.
    ///
    /// Once the cumulative size would pass the cap the capture is poisoned for
    /// the rest of the hop and any buffered bytes are released.
    pub fn accept(&mut self, chunk: &[u8], max_bytes: u64, delivery: BodyDelivery) -> ChunkDecision {
        if self.exceeds_limit {
            return ChunkDecision::Suppressed;
        }
        let total = self.captured_bytes.saturating_add(chunk.len() as u64);
        if total > max_bytes {
            self.exceeds_limit = true;
            self.pending = Vec::new();
            return ChunkDecision::Suppressed;
        }
        self.captured_bytes = total;
        match delivery {
            BodyDelivery::Streamed => ChunkDecision::Emit,
            BodyDelivery::Buffered => {
                self.pending.extend_from_slice(chunk);
                ChunkDecision::Buffered
            }
        }
    }

    /// Drop buffered bytes that were not emitted; the running total and the
    /// over-cap flag stay
    pub fn discard_pending(&mut self) {
        self.pending = Vec::new();
    }

    /// Take whatever was buffered and not yet emitted
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        if self.exceeds_limit || self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn exceeds_limit(&self) -> bool {
        self.exceeds_limit
    }

    pub fn captured_bytes(&self) -> u64 {
        self.captured_bytes
    }
}

/// Everything known about one live transport task
#[derive(Debug)]
pub struct TaskEntry {
    pub identities: RequestIdentityTable,
    pub current_request: Option<HttpRequest>,
    pub response: Option<HttpResponse>,
    pub bytes_received: u64,
    pub body: BodyCapture,
    observation: Option<ObservationToken>,
    last_activity: Instant,
}

impl TaskEntry {
    fn new(now: Instant) -> Self {
        Self {
            identities: RequestIdentityTable::new(),
            current_request: None,
            response: None,
            bytes_received: 0,
            body: BodyCapture::default(),
            observation: None,
            last_activity: now,
        }
    }

    /// Attach the observation this entry controls; a previous one is detached
    pub fn attach_observation(&mut self, token: ObservationToken) {
        if let Some(previous) = self.observation.replace(token) {
            previous.invalidate();
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Start a new redirect hop: the previous hop's response and unflushed
    /// body are gone. The body cap keeps counting across hops.
    pub fn begin_hop(&mut self) {
        self.response = None;
        self.body.discard_pending();
    }

    /// Detach any live observation. Safe to call repeatedly.
    pub fn finalize(&mut self) {
        if let Some(token) = self.observation.take() {
            token.invalidate();
        }
    }
}

impl Drop for TaskEntry {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Mapping of live task ids to their entries
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: the first call creates the entry, later calls return it
    pub fn get_or_create(&mut self, task_id: TaskId, now: Instant) -> &mut TaskEntry {
        self.tasks
            .entry(task_id)
            .or_insert_with(|| TaskEntry::new(now))
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskEntry> {
        self.tasks.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: TaskId) -> Option<&mut TaskEntry> {
        self.tasks.get_mut(&task_id)
    }

    /// Remove and finalize an entry; `None` when it was already gone
    pub fn remove(&mut self, task_id: TaskId) -> Option<TaskEntry> {
        let mut entry = self.tasks.remove(&task_id)?;
        entry.finalize();
        Some(entry)
    }

    /// Reclaim entries idle for at least `max_idle`, returning their ids
    pub fn sweep_idle(&mut self, now: Instant, max_idle: Duration) -> Vec<TaskId> {
        let stale: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.idle_for(now) >= max_idle)
            .map(|(task_id, _)| *task_id)
            .collect();
        for task_id in &stale {
            self.remove(*task_id);
        }
        stale
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskId, &TaskEntry)> {
        self.tasks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Fingerprint, SequentialIds};

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = TaskRegistry::new();
        let mut ids = SequentialIds::new();
        let now = Instant::now();

        let fp = Fingerprint::of(&HttpRequest::get("https://example.com"));
        registry
            .get_or_create(TaskId(7), now)
            .identities
            .resolve_or_assign(fp, &mut ids);

        let entry = registry.get_or_create(TaskId(7), now);
        assert_eq!(entry.identities.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut registry = TaskRegistry::new();
        registry.get_or_create(TaskId(1), Instant::now());

        assert!(registry.remove(TaskId(1)).is_some());
        assert!(registry.remove(TaskId(1)).is_none());
        assert!(!registry.contains(TaskId(1)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_detaches_observation() {
        let mut registry = TaskRegistry::new();
        let token = ObservationToken::new();
        registry
            .get_or_create(TaskId(1), Instant::now())
            .attach_observation(token.clone());

        registry.remove(TaskId(1));
        assert!(!token.is_active());
    }

    #[test]
    fn test_dropping_registry_detaches_observations() {
        let token = ObservationToken::new();
        {
            let mut registry = TaskRegistry::new();
            registry
                .get_or_create(TaskId(1), Instant::now())
                .attach_observation(token.clone());
        }
        assert!(!token.is_active());
    }

    #[test]
    fn test_attach_replaces_previous_observation() {
        let mut entry = TaskEntry::new(Instant::now());
        let first = ObservationToken::new();
        let second = ObservationToken::new();

        entry.attach_observation(first.clone());
        entry.attach_observation(second.clone());

        assert!(!first.is_active());
        assert!(second.is_active());
    }

    #[test]
    fn test_sweep_idle() {
        let mut registry = TaskRegistry::new();
        let start = Instant::now();
        registry.get_or_create(TaskId(1), start);
        registry.get_or_create(TaskId(2), start + Duration::from_secs(10));

        let swept = registry.sweep_idle(start + Duration::from_secs(12), Duration::from_secs(5));
        assert_eq!(swept, vec![TaskId(1)]);
        assert!(registry.contains(TaskId(2)));
    }

    #[test]
    fn test_body_capture_streamed_until_cap() {
        let mut body = BodyCapture::default();

        assert_eq!(body.accept(&[0; 6], 10, BodyDelivery::Streamed), ChunkDecision::Emit);
        assert_eq!(body.accept(&[0; 4], 10, BodyDelivery::Streamed), ChunkDecision::Emit);
        assert_eq!(body.accept(&[0; 1], 10, BodyDelivery::Streamed), ChunkDecision::Suppressed);
        assert!(body.exceeds_limit());

        // Stays suppressed even for an empty chunk.
        assert_eq!(body.accept(&[], 10, BodyDelivery::Streamed), ChunkDecision::Suppressed);
        assert_eq!(body.captured_bytes(), 10);
    }

    #[test]
    fn test_body_capture_buffered() {
        let mut body = BodyCapture::default();

        assert_eq!(body.accept(b"ab", 10, BodyDelivery::Buffered), ChunkDecision::Buffered);
        assert_eq!(body.accept(b"cd", 10, BodyDelivery::Buffered), ChunkDecision::Buffered);
        assert_eq!(body.take_pending(), Some(b"abcd".to_vec()));
        assert_eq!(body.take_pending(), None);
    }

    #[test]
    fn test_body_capture_buffered_over_cap_drops_pending() {
        let mut body = BodyCapture::default();

        body.accept(b"abc", 4, BodyDelivery::Buffered);
        assert_eq!(body.accept(b"de", 4, BodyDelivery::Buffered), ChunkDecision::Suppressed);
        assert_eq!(body.take_pending(), None);
    }

    #[test]
    fn test_begin_hop_keeps_body_cap() {
        let mut entry = TaskEntry::new(Instant::now());
        entry.response = Some(HttpResponse::new("https://example.com", 301));
        entry.body.accept(&[0; 8], 4, BodyDelivery::Streamed);

        entry.begin_hop();
        assert!(entry.response.is_none());
        assert!(entry.body.exceeds_limit());
        assert_eq!(
            entry.body.accept(&[0; 1], 4, BodyDelivery::Streamed),
            ChunkDecision::Suppressed
        );
    }

    #[test]
    fn test_begin_hop_drops_pending_but_keeps_total() {
        let mut entry = TaskEntry::new(Instant::now());
        entry.body.accept(b"abc", 5, BodyDelivery::Buffered);

        entry.begin_hop();
        assert_eq!(entry.body.take_pending(), None);
        assert_eq!(entry.body.captured_bytes(), 3);
        assert_eq!(
            entry.body.accept(b"def", 5, BodyDelivery::Buffered),
            ChunkDecision::Suppressed
        );
    }
}
