//! Broker-side worker records.

use std::fmt;

use bytes::Bytes;
use majordomo_core::messages::frame_text;
use tokio::time::Instant;

/// Worker identifier, derived from the transport identity frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    /// Derives the ID from a routing identity frame, replacing invalid UTF-8.
    #[must_use]
    pub fn from_identity(identity: &Bytes) -> Self {
        Self(frame_text(identity))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite key identifying a worker within the broker: its ID plus the
/// service it is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerKey {
    pub id: WorkerId,
    pub service: String,
}

impl WorkerKey {
    #[must_use]
    pub fn new(id: WorkerId, service: impl Into<String>) -> Self {
        Self {
            id,
            service: service.into(),
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.service)
    }
}

/// A registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub key: WorkerKey,
    /// Raw routing identity, used to address messages to the worker.
    pub identity: Bytes,
    /// The broker forgets the worker once `now >= expiry`.
    pub expiry: Instant,
    /// Position in the broker's known-worker order.
    pub(crate) seq: u64,
}

impl Worker {
    #[must_use]
    pub fn id(&self) -> &WorkerId {
        &self.key.id
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.key.service
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expiry
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    #[test]
    fn id_is_lossy_text_of_identity() {
        assert_eq!(
            WorkerId::from_identity(&Bytes::from_static(b"W1")).as_str(),
            "W1"
        );
        assert_eq!(
            WorkerId::from_identity(&Bytes::from_static(&[0xff, b'a'])).as_str(),
            "\u{fffd}a"
        );
    }

    #[test]
    fn key_equality_needs_both_fields() {
        let a = WorkerKey::new(WorkerId::from("w"), "echo");
        let b = WorkerKey::new(WorkerId::from("w"), "echo");
        let c = WorkerKey::new(WorkerId::from("w"), "other");

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(a.to_string(), "w@echo");
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Instant::now();
        let worker = Worker {
            key: WorkerKey::new(WorkerId::from("w"), "s"),
            identity: Bytes::from_static(b"w"),
            expiry: now + Duration::from_millis(10),
            seq: 0,
        };
        assert!(!worker.is_expired(now));
        assert!(worker.is_expired(now + Duration::from_millis(10)));
    }
}
