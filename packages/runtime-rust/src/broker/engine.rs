//! Broker message handling.
//!
//! The engine turns inbound worker and client messages into registry updates
//! and outbound messages. It never touches a socket: everything it sends goes
//! through the two outbound queues, drained by the broker reactor.

use std::sync::Arc;

use bytes::Bytes;
use majordomo_core::messages::frame_text;
use majordomo_core::{
    envelope, BrokerToClient, BrokerToWorker, ClientToBroker, Message, ProtocolError,
    ProtocolHeader, ServiceStatus, WorkerToBroker,
};
use parking_lot::Mutex;
use tokio::time::Instant;

use super::registry::ServiceRegistry;
use super::worker::{Worker, WorkerId, WorkerKey};
use crate::events::EventSink;
use crate::network::OutboundQueue;

/// Routing logic shared by both broker sockets.
pub struct BrokerEngine {
    registry: Arc<Mutex<ServiceRegistry>>,
    workers: OutboundQueue,
    clients: OutboundQueue,
    events: EventSink,
}

impl BrokerEngine {
    #[must_use]
    pub fn new(
        registry: Arc<Mutex<ServiceRegistry>>,
        workers: OutboundQueue,
        clients: OutboundQueue,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            workers,
            clients,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Worker-facing socket
    // -----------------------------------------------------------------------

    /// Handles `[worker identity][empty][header][command][...]`.
    pub fn on_worker_message(&self, mut message: Message, now: Instant) {
        tracing::debug!(%message, "received from worker");
        let Some(identity) = envelope::unwrap(&mut message) else {
            self.protocol_error("worker", &ProtocolError::TooFewFrames);
            return;
        };
        let (header, command) = match WorkerToBroker::decode(message) {
            Ok(decoded) => decoded,
            Err(err) => {
                self.protocol_error("worker", &err);
                return;
            }
        };

        let id = WorkerId::from_identity(&identity);
        let mut registry = self.registry.lock();
        match command {
            WorkerToBroker::Ready { service } => {
                self.process_ready(&mut registry, identity, id, header, service, now);
            }
            WorkerToBroker::Reply { client, body } => {
                self.process_reply(&mut registry, &id, &client, body, now);
            }
            WorkerToBroker::Heartbeat => {
                if registry.refresh(&id, now) {
                    self.events.info(format!("Heartbeat from {id} received."));
                } else {
                    tracing::debug!(%id, "heartbeat from unknown worker ignored");
                }
            }
            WorkerToBroker::Disconnect => {
                match registry.find(&id).map(|w| w.key.clone()) {
                    Some(key) => {
                        self.remove_worker(&mut registry, &key);
                        self.events.info(format!("Disconnect from {id} received."));
                    }
                    None => tracing::debug!(%id, "disconnect from unknown worker ignored"),
                }
            }
        }
        record_known_workers(&registry);
    }

    fn process_ready(
        &self,
        registry: &mut ServiceRegistry,
        identity: Bytes,
        id: WorkerId,
        header: ProtocolHeader,
        service: String,
        now: Instant,
    ) {
        if let Some(existing) = registry.find(&id).cloned() {
            // A known worker announcing itself again has lost track of its
            // session. Drop it and tell it so; it must register afresh.
            self.remove_worker(registry, &existing.key);
            self.events
                .info(format!("READY out of sync. Removed worker {id}."));
            self.workers.enqueue(envelope::wrap(
                &existing.identity,
                BrokerToWorker::Disconnect.encode(),
            ));
            self.events
                .info(format!("Send Disconnect command to worker {id}."));
            metrics::counter!("majordomo_broker_out_of_sync_total").increment(1);
            return;
        }

        let name = if header == ProtocolHeader::Service {
            format!("{service}-{}", ProtocolHeader::SERVICE)
        } else {
            service
        };
        if registry.service_required(&name).1 {
            self.events.info(format!("Added {name} to services list."));
        }
        registry.add_worker(WorkerKey::new(id.clone(), name.clone()), identity, now);
        self.events.info(format!(
            "READY processed. Worker {id} added to service {name}"
        ));
    }

    fn process_reply(
        &self,
        registry: &mut ServiceRegistry,
        id: &WorkerId,
        client: &Bytes,
        body: Message,
        now: Instant,
    ) {
        let Some(worker) = registry.find(id).cloned() else {
            tracing::debug!(%id, "reply from unknown worker ignored");
            return;
        };
        let reply = BrokerToClient::Reply {
            service: worker.service().to_string(),
            body,
        };
        self.clients.enqueue(envelope::wrap(client, reply.encode()));
        self.events.info(format!(
            "Reply from {id} received and sent to {}",
            frame_text(client)
        ));
        metrics::counter!("majordomo_broker_replies_total").increment(1);
        registry.add_worker(worker.key, worker.identity, now);
    }

    // -----------------------------------------------------------------------
    // Client-facing socket
    // -----------------------------------------------------------------------

    /// Handles `[client identity][empty][header][command][...]`.
    pub fn on_client_message(&self, mut message: Message) {
        tracing::debug!(%message, "received from client");
        let Some(client) = envelope::unwrap(&mut message) else {
            self.protocol_error("client", &ProtocolError::TooFewFrames);
            return;
        };
        match ClientToBroker::decode(message) {
            Ok(ClientToBroker::Request { service, body }) => {
                self.process_request(&client, service, body);
            }
            Ok(ClientToBroker::Heartbeat) => {
                self.clients
                    .enqueue(envelope::wrap(&client, BrokerToClient::Heartbeat.encode()));
            }
            Err(err) => self.protocol_error("client", &err),
        }
    }

    fn process_request(&self, client: &Bytes, service: String, body: Message) {
        let worker = {
            let mut registry = self.registry.lock();
            if registry.service_required(&service).1 {
                self.events
                    .info(format!("Added {service} to services list."));
            }
            registry.next_worker(&service)
        };

        match worker {
            Some(worker) => {
                let request = BrokerToWorker::Request {
                    client: client.clone(),
                    body,
                };
                self.workers
                    .enqueue(envelope::wrap(&worker.identity, request.encode()));
                self.events.info(format!(
                    "Send request to {} from {}",
                    worker.id(),
                    frame_text(client)
                ));
                metrics::counter!("majordomo_broker_requests_dispatched_total").increment(1);
            }
            None => {
                let reply = BrokerToClient::Reply {
                    service: service.clone(),
                    body: ServiceStatus::no_worker().to_body(),
                };
                self.clients.enqueue(envelope::wrap(client, reply.encode()));
                self.events
                    .info(format!("The service : {service} is not available now"));
                metrics::counter!("majordomo_broker_requests_unroutable_total").increment(1);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat timer
    // -----------------------------------------------------------------------

    /// Purges expired workers, then queues a HEARTBEAT to every remaining
    /// known worker in registration order.
    pub fn on_heartbeat_tick(&self, now: Instant) {
        let targets: Vec<Bytes> = {
            let mut registry = self.registry.lock();
            self.events.info("Start purging for all services");
            for worker in registry.purge_expired(now) {
                self.log_removed(&worker);
                metrics::counter!("majordomo_broker_workers_purged_total").increment(1);
            }
            record_known_workers(&registry);
            registry
                .known_workers()
                .map(|worker| worker.identity.clone())
                .collect()
        };

        for identity in &targets {
            self.workers
                .enqueue(envelope::wrap(identity, BrokerToWorker::Heartbeat.encode()));
        }
        self.events.info("Sent HEARTBEAT to all workers");
    }

    fn remove_worker(&self, registry: &mut ServiceRegistry, key: &WorkerKey) {
        if let Some(worker) = registry.remove_worker(key) {
            self.log_removed(&worker);
        }
    }

    fn log_removed(&self, worker: &Worker) {
        self.events.info(format!(
            "Removed worker {} from service {}",
            worker.id(),
            worker.service()
        ));
        self.events
            .info(format!("Removed {} from known worker.", worker.id()));
    }

    fn protocol_error(&self, source: &'static str, err: &ProtocolError) {
        metrics::counter!("majordomo_broker_protocol_errors_total", "source" => source)
            .increment(1);
        self.events
            .error(format!("Dropped message from {source}: {err}"));
    }
}

fn record_known_workers(registry: &ServiceRegistry) {
    #[allow(clippy::cast_precision_loss)]
    let count = registry.known_count() as f64;
    metrics::gauge!("majordomo_broker_known_workers").set(count);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use majordomo_core::{Command, NO_WORKER_MESSAGE};
    use tokio::sync::broadcast;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::events::{LogEvent, LogLevel, Role};

    const EXPIRY: Duration = Duration::from_millis(300);

    struct Harness {
        engine: BrokerEngine,
        registry: Arc<Mutex<ServiceRegistry>>,
        to_workers: UnboundedReceiver<Message>,
        to_clients: UnboundedReceiver<Message>,
        log: broadcast::Receiver<LogEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let events = EventSink::new(Role::Broker);
            let log = events.subscribe();
            let registry = Arc::new(Mutex::new(ServiceRegistry::new(EXPIRY)));
            let (workers, to_workers) = OutboundQueue::new("workers", events.clone());
            let (clients, to_clients) = OutboundQueue::new("clients", events.clone());
            Self {
                engine: BrokerEngine::new(Arc::clone(&registry), workers, clients, events),
                registry,
                to_workers,
                to_clients,
                log,
            }
        }

        fn from_worker(&self, id: &str, frames: &[&[u8]], now: Instant) {
            self.engine.on_worker_message(routed(id, frames), now);
        }

        fn from_client(&self, id: &str, frames: &[&[u8]]) {
            self.engine.on_client_message(routed(id, frames));
        }

        fn ready(&self, id: &str, service: &str, now: Instant) {
            self.from_worker(id, &[b"MDPW01", &[0x01], service.as_bytes()], now);
        }

        fn request(&self, client: &str, service: &str, body: &str) {
            self.from_client(
                client,
                &[b"MDPC01", &[0x02], service.as_bytes(), body.as_bytes()],
            );
        }

        fn drain_log(&mut self) -> Vec<LogEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.log.try_recv() {
                events.push(event);
            }
            events
        }

        fn known(&self) -> Vec<String> {
            self.registry
                .lock()
                .known_workers()
                .map(|w| w.id().to_string())
                .collect()
        }
    }

    fn routed(identity: &str, frames: &[&[u8]]) -> Message {
        let mut message = Message::from_frames(frames.iter().map(|f| Bytes::copy_from_slice(f)));
        message.push_front(Bytes::new());
        message.push_front(Bytes::copy_from_slice(identity.as_bytes()));
        message
    }

    fn frames(items: &[&[u8]]) -> Message {
        Message::from_frames(items.iter().map(|f| Bytes::copy_from_slice(f)))
    }

    #[test]
    fn ready_registers_worker_and_logs() {
        let mut h = Harness::new();
        h.ready("w1", "echo", Instant::now());

        assert_eq!(h.known(), vec!["w1"]);
        let texts: Vec<_> = h.drain_log().into_iter().map(|e| e.text).collect();
        assert!(texts.contains(&"Added echo to services list.".to_string()));
        assert!(texts.contains(&"READY processed. Worker w1 added to service echo".to_string()));
    }

    #[test]
    fn service_header_renames_the_service() {
        let h = Harness::new();
        h.from_worker("w1", &[b"MDPS01", &[0x01], b"echo"], Instant::now());

        let registry = h.registry.lock();
        let worker = registry.find(&WorkerId::from("w1")).unwrap();
        assert_eq!(worker.service(), "echo-MDPS01");
    }

    #[test]
    fn request_goes_to_oldest_idle_worker() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.ready("w1", "echo", now);
        h.ready("w2", "echo", now);

        h.request("c1", "echo", "hello");

        let forwarded = h.to_workers.try_recv().unwrap();
        assert_eq!(
            forwarded,
            frames(&[b"w1", b"", b"MDPW01", &[0x02], b"c1", b"", b"hello"])
        );
        assert!(h.to_clients.try_recv().is_err());
    }

    #[test]
    fn request_without_worker_gets_status_reply_only() {
        let mut h = Harness::new();
        h.request("c1", "TestService", "hello");

        let reply = h.to_clients.try_recv().unwrap();
        let expected_body = format!("ErrorCode:14, ErrorMsg:{NO_WORKER_MESSAGE}");
        assert_eq!(
            reply,
            frames(&[
                b"c1",
                b"",
                &[0x03],
                b"TestService",
                expected_body.as_bytes()
            ])
        );
        assert!(h.to_clients.try_recv().is_err(), "exactly one reply");
        assert!(h.to_workers.try_recv().is_err(), "nothing forwarded");
    }

    #[test]
    fn reply_routes_to_client_and_requeues_worker() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.ready("w1", "S", now);

        for round in 0..3 {
            h.request("c1", "S", "ping");
            assert_eq!(
                h.to_workers.try_recv().unwrap().get(2).unwrap(),
                &Bytes::from_static(b"MDPW01"),
                "round {round} dispatched"
            );
            h.from_worker("w1", &[b"MDPW01", &[0x03], b"c1", b"", b"ok"], now);
            assert_eq!(
                h.to_clients.try_recv().unwrap(),
                frames(&[b"c1", b"", &[0x03], b"S", b"ok"])
            );
        }
        assert_eq!(h.known(), vec!["w1"]);
    }

    #[test]
    fn second_ready_is_out_of_sync() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.ready("w1", "echo", now);
        h.ready("w1", "echo", now);

        assert!(h.known().is_empty());
        assert_eq!(
            h.to_workers.try_recv().unwrap(),
            frames(&[b"w1", b"", b"MDPW01", &[0x05]])
        );

        // Not eligible for requests until it registers again.
        h.request("c1", "echo", "x");
        assert!(h.to_workers.try_recv().is_err());
        let reply = h.to_clients.try_recv().unwrap();
        assert!(frame_text(reply.get(4).unwrap()).starts_with("ErrorCode:14"));

        h.ready("w1", "echo", now);
        assert_eq!(h.known(), vec!["w1"]);
    }

    #[test]
    fn heartbeat_refreshes_expiry() {
        let h = Harness::new();
        let t0 = Instant::now();
        h.ready("w1", "echo", t0);

        let later = t0 + Duration::from_millis(250);
        h.from_worker("w1", &[b"MDPW01", &[0x04]], later);

        let registry = h.registry.lock();
        assert_eq!(
            registry.find(&WorkerId::from("w1")).unwrap().expiry,
            later + EXPIRY
        );
    }

    #[test]
    fn disconnect_removes_worker_immediately() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.ready("w1", "echo", now);
        h.drain_log();

        h.from_worker("w1", &[b"MDPW01", &[0x05]], now);

        assert!(h.known().is_empty());
        let texts: Vec<_> = h.drain_log().into_iter().map(|e| e.text).collect();
        assert!(texts.contains(&"Disconnect from w1 received.".to_string()));
    }

    #[test]
    fn messages_from_unknown_workers_are_ignored() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.from_worker("ghost", &[b"MDPW01", &[0x04]], now);
        h.from_worker("ghost", &[b"MDPW01", &[0x05]], now);
        h.from_worker("ghost", &[b"MDPW01", &[0x03], b"c1", b"", b"ok"], now);

        assert!(h.to_clients.try_recv().is_err());
        assert!(h
            .drain_log()
            .iter()
            .all(|event| event.level == LogLevel::Info));
    }

    #[test]
    fn malformed_worker_messages_are_reported_and_dropped() {
        let mut h = Harness::new();
        let now = Instant::now();
        h.from_worker("w1", &[b"MDPW01"], now);
        h.from_worker("w1", &[b"MDPW01", &[0x01, 0x02], b"echo"], now);
        h.from_worker("w1", &[b"MDPW01", &[0x09]], now);
        h.from_worker("w1", &[b"BOGUS1", &[0x01], b"echo"], now);

        let errors: Vec<_> = h
            .drain_log()
            .into_iter()
            .filter(|e| e.level == LogLevel::Error)
            .map(|e| e.text)
            .collect();
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("too few frames"));
        assert!(h.known().is_empty());
    }

    #[test]
    fn client_heartbeat_is_answered_immediately() {
        let mut h = Harness::new();
        h.from_client("c1", &[b"MDPC01", &[0x04]]);

        assert_eq!(
            h.to_clients.try_recv().unwrap(),
            frames(&[b"c1", b"", &[Command::Heartbeat.as_byte()]])
        );
    }

    #[test]
    fn malformed_request_is_reported() {
        let mut h = Harness::new();
        h.from_client("c1", &[b"MDPC01", &[0x02], b"echo"]);

        assert!(h.to_clients.try_recv().is_err());
        assert!(h.drain_log().iter().any(|e| e.level == LogLevel::Error));
    }

    #[test]
    fn heartbeat_tick_purges_then_pings_survivors_in_order() {
        let mut h = Harness::new();
        let t0 = Instant::now();
        h.ready("stale", "a", t0);
        h.ready("w2", "b", t0 + Duration::from_millis(100));
        h.ready("w3", "a", t0 + Duration::from_millis(100));

        h.engine.on_heartbeat_tick(t0 + EXPIRY);

        assert_eq!(h.known(), vec!["w2", "w3"]);
        assert_eq!(
            h.to_workers.try_recv().unwrap(),
            frames(&[b"w2", b"", b"MDPW01", &[0x04]])
        );
        assert_eq!(
            h.to_workers.try_recv().unwrap(),
            frames(&[b"w3", b"", b"MDPW01", &[0x04]])
        );
        assert!(h.to_workers.try_recv().is_err());
    }
}
