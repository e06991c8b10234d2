//! Worker and service bookkeeping.
//!
//! Storage is keyed throughout: workers by [`WorkerKey`], the ID index maps a
//! [`WorkerId`] to its key, and services hold idle queues of keys rather than
//! worker records. Known-worker insertion order is kept as an explicit
//! sequence so heartbeats go out oldest-registration first.
//!
//! The registry is plain data; callers pass `now` in and wrap it in a mutex
//! so add, remove and purge never interleave.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::service::Service;
use super::worker::{Worker, WorkerId, WorkerKey};

#[derive(Debug)]
pub struct ServiceRegistry {
    /// How far past its last refresh a worker stays registered.
    expiry: Duration,
    workers: HashMap<WorkerKey, Worker>,
    by_id: HashMap<WorkerId, WorkerKey>,
    services: HashMap<String, Service>,
    known: BTreeMap<u64, WorkerKey>,
    next_seq: u64,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            workers: HashMap::new(),
            by_id: HashMap::new(),
            services: HashMap::new(),
            known: BTreeMap::new(),
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn set_expiry(&mut self, expiry: Duration) {
        self.expiry = expiry;
    }

    /// Looks a service up by name, creating it on first reference. The flag
    /// is `true` when the service was just created.
    pub fn service_required(&mut self, name: &str) -> (&mut Service, bool) {
        let created = !self.services.contains_key(name);
        let service = self
            .services
            .entry(name.to_string())
            .or_insert_with(|| Service::new(name));
        (service, created)
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Service names, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Finds a known worker by ID.
    #[must_use]
    pub fn find(&self, id: &WorkerId) -> Option<&Worker> {
        self.by_id.get(id).and_then(|key| self.workers.get(key))
    }

    /// Refreshes the worker's expiry, registers it as known if new, and marks
    /// it idle in its service (tail of the queue unless already queued).
    ///
    /// Returns `true` if the worker was not known before.
    pub fn add_worker(&mut self, key: WorkerKey, identity: Bytes, now: Instant) -> bool {
        let expiry = now + self.expiry;
        let newly_known = match self.workers.get_mut(&key) {
            Some(worker) => {
                worker.expiry = expiry;
                false
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.known.insert(seq, key.clone());
                self.by_id.insert(key.id.clone(), key.clone());
                self.workers.insert(
                    key.clone(),
                    Worker {
                        key: key.clone(),
                        identity,
                        expiry,
                        seq,
                    },
                );
                true
            }
        };
        let (service, _) = self.service_required(&key.service);
        service.add_waiting_worker(key);
        newly_known
    }

    /// Drops the worker from its service and from the known set. Absent
    /// entries are skipped, so removing twice is harmless.
    pub fn remove_worker(&mut self, key: &WorkerKey) -> Option<Worker> {
        if let Some(service) = self.services.get_mut(&key.service) {
            service.delete_worker(key);
        }
        self.forget(key)
    }

    fn forget(&mut self, key: &WorkerKey) -> Option<Worker> {
        let worker = self.workers.remove(key)?;
        self.known.remove(&worker.seq);
        if self.by_id.get(&key.id) == Some(key) {
            self.by_id.remove(&key.id);
        }
        Some(worker)
    }

    /// Pushes a known worker's expiry to `now + expiry`. Returns `false` if
    /// the ID is unknown.
    pub fn refresh(&mut self, id: &WorkerId, now: Instant) -> bool {
        let expiry = now + self.expiry;
        let Some(key) = self.by_id.get(id) else {
            return false;
        };
        match self.workers.get_mut(key) {
            Some(worker) => {
                worker.expiry = expiry;
                true
            }
            None => false,
        }
    }

    /// Pops the oldest idle worker for `service`, creating the service if it
    /// does not exist yet.
    pub fn next_worker(&mut self, service: &str) -> Option<Worker> {
        let (svc, _) = self.service_required(service);
        let key = svc.next_worker()?;
        self.workers.get(&key).cloned()
    }

    /// Removes expired idle workers, oldest first, stopping at the first live
    /// worker in each service. Returns the removed workers.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<Worker> {
        let mut expired = Vec::new();
        for service in self.services.values_mut() {
            while let Some(key) = service.idle().front().cloned() {
                let is_expired = match self.workers.get(&key) {
                    Some(worker) => worker.is_expired(now),
                    None => true,
                };
                if !is_expired {
                    break;
                }
                service.delete_worker(&key);
                expired.push(key);
            }
        }
        expired.iter().filter_map(|key| self.forget(key)).collect()
    }

    /// Known workers in registration order.
    pub fn known_workers(&self) -> impl Iterator<Item = &Worker> {
        self.known.values().filter_map(|key| self.workers.get(key))
    }

    #[must_use]
    pub fn known_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const EXPIRY: Duration = Duration::from_millis(300);

    fn key(id: &str, service: &str) -> WorkerKey {
        WorkerKey::new(WorkerId::from(id), service)
    }

    fn add(registry: &mut ServiceRegistry, id: &str, service: &str, now: Instant) {
        registry.add_worker(key(id, service), Bytes::from(id.to_string()), now);
    }

    #[test]
    fn add_creates_service_and_known_worker() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let now = Instant::now();
        add(&mut registry, "w1", "echo", now);

        let worker = registry.find(&WorkerId::from("w1")).unwrap();
        assert_eq!(worker.service(), "echo");
        assert_eq!(worker.expiry, now + EXPIRY);
        assert_eq!(registry.service_names(), vec!["echo".to_string()]);
        assert_eq!(registry.service("echo").unwrap().idle().len(), 1);
    }

    #[test]
    fn service_required_reports_creation_once() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        assert!(registry.service_required("a").1);
        assert!(!registry.service_required("a").1);
    }

    #[test]
    fn requeue_after_reply_keeps_single_worker_busy() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let now = Instant::now();
        add(&mut registry, "w1", "echo", now);

        for _ in 0..5 {
            let worker = registry.next_worker("echo").unwrap();
            assert_eq!(worker.id().as_str(), "w1");
            assert!(registry.next_worker("echo").is_none());
            // A reply re-adds the worker.
            registry.add_worker(worker.key, worker.identity, now);
        }
        assert_eq!(registry.known_count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        add(&mut registry, "w1", "echo", Instant::now());

        assert!(registry.remove_worker(&key("w1", "echo")).is_some());
        assert!(registry.remove_worker(&key("w1", "echo")).is_none());
        assert!(registry.find(&WorkerId::from("w1")).is_none());
        assert!(registry.service("echo").unwrap().idle().is_empty());
    }

    #[test]
    fn refreshed_head_shields_expired_workers_behind_it() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let t0 = Instant::now();
        add(&mut registry, "live", "echo", t0);
        add(&mut registry, "silent", "echo", t0);

        let later = t0 + EXPIRY;
        registry.refresh(&WorkerId::from("live"), later);
        assert!(registry.purge_expired(later).is_empty());
        assert!(registry.find(&WorkerId::from("silent")).is_some());

        // Once the head is dispatched, the silent worker is at the front.
        assert_eq!(registry.next_worker("echo").unwrap().id().as_str(), "live");
        let purged = registry.purge_expired(later);
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id().as_str(), "silent");
    }

    #[test]
    fn refresh_only_touches_known_workers() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let t0 = Instant::now();
        add(&mut registry, "w1", "echo", t0);

        let later = t0 + Duration::from_millis(200);
        assert!(registry.refresh(&WorkerId::from("w1"), later));
        assert!(!registry.refresh(&WorkerId::from("ghost"), later));
        assert_eq!(
            registry.find(&WorkerId::from("w1")).unwrap().expiry,
            later + EXPIRY
        );
    }

    #[test]
    fn known_workers_keep_registration_order() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let now = Instant::now();
        for (id, service) in [("c", "x"), ("a", "y"), ("b", "x")] {
            add(&mut registry, id, service, now);
        }
        registry.remove_worker(&key("a", "y"));
        add(&mut registry, "a", "y", now);

        let order: Vec<_> = registry
            .known_workers()
            .map(|w| w.id().as_str().to_string())
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn purge_stops_at_first_live_worker() {
        let mut registry = ServiceRegistry::new(EXPIRY);
        let t0 = Instant::now();
        add(&mut registry, "old", "s", t0);
        add(&mut registry, "young", "s", t0 + Duration::from_millis(100));
        // A busy worker is not in the idle queue and is left alone.
        add(&mut registry, "busy", "s", t0);
        registry.service_required("s").0.delete_worker(&key("busy", "s"));

        let purged = registry.purge_expired(t0 + EXPIRY);
        let ids: Vec<_> = purged.iter().map(|w| w.id().as_str()).collect();
        assert_eq!(ids, vec!["old"]);
        assert!(registry.find(&WorkerId::from("young")).is_some());
        assert!(registry.find(&WorkerId::from("busy")).is_some());
    }

    proptest! {
        #[test]
        fn dispatch_follows_ready_order(n in 1usize..24) {
            let mut registry = ServiceRegistry::new(EXPIRY);
            let now = Instant::now();
            let ids: Vec<String> = (0..n).map(|i| format!("w{i}")).collect();
            for id in &ids {
                add(&mut registry, id, "svc", now);
            }

            for id in &ids {
                let worker = registry.next_worker("svc").unwrap();
                prop_assert_eq!(worker.id().as_str(), id.as_str());
            }
            prop_assert!(registry.next_worker("svc").is_none());
        }

        #[test]
        fn purge_removes_exactly_the_expired_prefix(k in 1usize..16, cut in 0usize..16) {
            let j = cut.min(k);
            let mut registry = ServiceRegistry::new(EXPIRY);
            let t0 = Instant::now();
            for i in 0..k {
                add(&mut registry, &format!("w{i}"), "svc", t0 + Duration::from_millis(i as u64 + 1));
            }

            // `now` reaches the expiry of the j-th worker (1-based) but not the next.
            let now = t0 + EXPIRY + Duration::from_millis(j as u64);
            let purged = registry.purge_expired(now);

            let purged_ids: Vec<String> = purged.iter().map(|w| w.id().to_string()).collect();
            let expected: Vec<String> = (0..j).map(|i| format!("w{i}")).collect();
            prop_assert_eq!(purged_ids, expected);
            prop_assert_eq!(registry.known_count(), k - j);
            prop_assert_eq!(registry.service("svc").unwrap().idle().len(), k - j);
        }
    }
}
