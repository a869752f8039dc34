//! Request identities
//!
//! A transport task can carry several logical requests (one per redirect
//! hop). Each hop is identified by a [`Fingerprint`] of the outgoing request
//! and bound to a [`RequestId`] drawn from one global allocator, so ids are
//! unique across every task the inspector has seen.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::transport::HttpRequest;

/// DevTools request id; rendered as a decimal string on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content digest of an outgoing request (method, URL, headers, body)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(request: &HttpRequest) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefix every field so that ("ab", "c") and ("a", "bc") differ.
        feed(&mut hasher, request.method.as_bytes());
        feed(&mut hasher, request.url.as_bytes());
        hasher.update((request.headers.len() as u64).to_be_bytes());
        for (name, value) in &request.headers {
            feed(&mut hasher, name.to_ascii_lowercase().as_bytes());
            feed(&mut hasher, value.as_bytes());
        }
        match &request.body {
            Some(body) => {
                hasher.update([1u8]);
                feed(&mut hasher, body.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(hasher.finalize().into())
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..12])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Source of fresh request ids
pub trait RequestIdAllocator {
    fn next_id(&mut self) -> RequestId;
}

impl<F> RequestIdAllocator for F
where
    F: FnMut() -> RequestId,
{
    fn next_id(&mut self) -> RequestId {
        self()
    }
}

/// The global monotonically increasing counter, starting at 0
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: u64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

impl RequestIdAllocator for SequentialIds {
    fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next);
        self.next += 1;
        id
    }
}

/// Per-task mapping from fingerprint to request id
///
/// Not synchronized: it is only ever touched from the serializer context.
#[derive(Debug, Default)]
pub struct RequestIdentityTable {
    ids: HashMap<Fingerprint, RequestId>,
    current: Option<Fingerprint>,
}

impl RequestIdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id bound to `fingerprint`, assigning a fresh one on first sight.
    ///
    /// The boolean is `true` when the id was just assigned.
    pub fn resolve_or_assign(
        &mut self,
        fingerprint: Fingerprint,
        allocator: &mut dyn RequestIdAllocator,
    ) -> (RequestId, bool) {
        if let Some(id) = self.ids.get(&fingerprint) {
            return (*id, false);
        }
        let id = allocator.next_id();
        self.ids.insert(fingerprint, id);
        (id, true)
    }

    /// Id previously bound to `fingerprint`, without assigning
    pub fn resolve(&self, fingerprint: &Fingerprint) -> Option<RequestId> {
        self.ids.get(fingerprint).copied()
    }

    /// Mark which fingerprint the task's current outgoing request has
    pub fn set_current(&mut self, fingerprint: Option<Fingerprint>) {
        self.current = fingerprint;
    }

    /// Id of the current outgoing request, `None` while it is unregistered
    pub fn current_id(&self) -> Option<RequestId> {
        self.current.as_ref().and_then(|fp| self.resolve(fp))
    }

    pub fn all_ids(&self) -> BTreeSet<RequestId> {
        self.ids.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> HttpRequest {
        HttpRequest::get(format!("https://example.com/{path}"))
    }

    #[test]
    fn test_fingerprint_is_content_derived() {
        let a = Fingerprint::of(&request("a"));
        let a_again = Fingerprint::of(&request("a"));
        let b = Fingerprint::of(&request("b"));

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 64);
    }

    #[test]
    fn test_fingerprint_covers_method_headers_and_body() {
        let base = request("a");
        let post = HttpRequest::new("POST", base.url.clone());
        let with_header = base.clone().with_header("Accept", "text/plain");
        let with_body = base.clone().with_body("payload");

        let fp = Fingerprint::of(&base);
        assert_ne!(fp, Fingerprint::of(&post));
        assert_ne!(fp, Fingerprint::of(&with_header));
        assert_ne!(fp, Fingerprint::of(&with_body));
    }

    #[test]
    fn test_sequential_ids() {
        let mut ids = SequentialIds::new();
        assert_eq!(ids.next_id(), RequestId(0));
        assert_eq!(ids.next_id(), RequestId(1));
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn test_same_fingerprint_resolves_to_same_id() {
        let mut ids = SequentialIds::new();
        let mut table = RequestIdentityTable::new();
        let fp = Fingerprint::of(&request("a"));

        let (first, fresh) = table.resolve_or_assign(fp, &mut ids);
        assert!(fresh);
        let (second, fresh) = table.resolve_or_assign(fp, &mut ids);
        assert!(!fresh);

        assert_eq!(first, second);
        assert_eq!(ids.issued(), 1);
    }

    #[test]
    fn test_closure_allocator_generates_ids_per_hop() {
        let mut next = 0u64;
        let mut allocator = || {
            let id = RequestId(next);
            next += 1;
            id
        };
        let mut table = RequestIdentityTable::new();

        table.resolve_or_assign(Fingerprint::of(&request("path1")), &mut allocator);
        table.resolve_or_assign(Fingerprint::of(&request("path2")), &mut allocator);

        let ids = table.all_ids();
        assert!(ids.contains(&RequestId(0)));
        assert!(ids.contains(&RequestId(1)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ids_strictly_increase_and_are_not_shared_between_tables() {
        let mut ids = SequentialIds::new();
        let mut first_task = RequestIdentityTable::new();
        let mut second_task = RequestIdentityTable::new();

        let mut assigned = Vec::new();
        for hop in 0..4 {
            let (id, _) =
                first_task.resolve_or_assign(Fingerprint::of(&request(&hop.to_string())), &mut ids);
            assigned.push(id);
        }
        assert!(assigned.windows(2).all(|pair| pair[0] < pair[1]));

        // Same content on another task still gets a new id.
        let (other, fresh) = second_task.resolve_or_assign(Fingerprint::of(&request("0")), &mut ids);
        assert!(fresh);
        assert!(!first_task.all_ids().contains(&other));
    }

    #[test]
    fn test_current_id_unresolved_until_registered() {
        let mut ids = SequentialIds::new();
        let mut table = RequestIdentityTable::new();
        let fp = Fingerprint::of(&request("a"));

        table.set_current(Some(fp));
        assert_eq!(table.current_id(), None);

        let (id, _) = table.resolve_or_assign(fp, &mut ids);
        assert_eq!(table.current_id(), Some(id));

        table.set_current(None);
        assert_eq!(table.current_id(), None);
    }
}
