use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use simplepipe_frame::{
    encode_event, encode_status, priority, write_json, CacheFlag, Cacheable, PayloadRegistry,
    PipeEvent, PipeKey, PipeStatus,
};
use simplepipe_session::{
    drain_to, NoopHandler, PipeConfig, PipeSession, SessionCodec, SessionRegistry,
};
use simplepipe_transport::PipeSender;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: u32,
}

impl PipeEvent for Quote {
    fn tag(&self) -> &str {
        "Quote"
    }
    fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
        write_json("Quote", self, dst)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Alert {
    id: u32,
}

impl PipeEvent for Alert {
    fn tag(&self) -> &str {
        "Alert"
    }
    fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
        write_json("Alert", &self.id, dst)
    }
    fn priority(&self) -> Option<i32> {
        Some(priority::IMPORTANT)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct Status {
    user: u32,
    text: Mutex<String>,
    cached: CacheFlag,
}

impl PipeEvent for Status {
    fn tag(&self) -> &str {
        "Status"
    }
    fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
        write_json("Status", &*self.text.lock(), dst)
    }
    fn as_cacheable(&self) -> Option<&dyn Cacheable> {
        Some(self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Cacheable for Status {
    fn is_cached(&self) -> bool {
        self.cached.get()
    }
    fn set_cached(&self, cached: bool) {
        self.cached.set(cached);
    }
    fn same_item(&self, other: &dyn PipeEvent) -> bool {
        other
            .as_any()
            .downcast_ref::<Status>()
            .is_some_and(|other| other.user == self.user)
    }
    fn synchronize_from(&self, other: &dyn PipeEvent) {
        if let Some(other) = other.as_any().downcast_ref::<Status>() {
            *self.text.lock() = other.text.lock().clone();
        }
    }
}

fn status(user: u32, text: &str) -> Arc<dyn PipeEvent> {
    Arc::new(Status {
        user,
        text: Mutex::new(text.to_string()),
        cached: CacheFlag::default(),
    })
}

fn quote(price: u32) -> Arc<dyn PipeEvent> {
    Arc::new(Quote {
        symbol: "ACME".to_string(),
        price,
    })
}

fn registry() -> SessionRegistry {
    SessionRegistry::new(PipeConfig {
        background_reaper: false,
        ..PipeConfig::default()
    })
}

fn payloads() -> Arc<PayloadRegistry> {
    let mut payloads = PayloadRegistry::new();
    payloads.register_json::<Quote>("Quote").unwrap();
    Arc::new(payloads)
}

fn open(registry: &SessionRegistry) -> (PipeKey, Arc<PipeSession>) {
    let session = Arc::new(PipeSession::new(Arc::new(NoopHandler)));
    let key = registry.setup(&session).unwrap();
    (key, session)
}

#[derive(Default)]
struct Wire(Vec<u8>);

impl PipeSender for Wire {
    fn send(&mut self, bytes: &[u8]) -> simplepipe_transport::Result<()> {
        self.0.extend_from_slice(bytes);
        Ok(())
    }
}

fn prices(events: &[simplepipe_session::ReceivedEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|received| received.event.as_any().downcast_ref::<Quote>())
        .map(|quote| quote.price)
        .collect()
}

#[test]
fn plain_items_keep_call_order_and_cacheables_never_duplicate() {
    let registry = registry();
    let (key, session) = open(&registry);

    registry.pipe_in(&key, &[quote(1), quote(2)]).unwrap();
    let pending_status = status(7, "away");
    registry
        .pipe_in(&key, &[pending_status.clone(), quote(3)])
        .unwrap();
    registry
        .pipe_in(&key, &[pending_status, status(7, "back"), quote(4)])
        .unwrap();

    let pending = session.clone_pending(|_| true);
    let tags: Vec<&str> = pending.iter().map(|item| item.tag()).collect();
    assert_eq!(tags, vec!["Quote", "Quote", "Status", "Quote", "Quote"]);
    let merged = pending[2].as_any().downcast_ref::<Status>().unwrap();
    assert_eq!(*merged.text.lock(), "back");
}

#[test]
fn removed_session_is_gone_and_second_remove_is_noop() {
    let registry = registry();
    let (key, _) = open(&registry);
    assert!(registry.remove(&key).is_some());
    assert!(registry.lookup(&key).is_none());
    assert!(registry.remove(&key).is_none());
}

#[test]
fn encode_then_parse_reproduces_payload_order() {
    let server = registry();
    let (key, session) = open(&server);
    server
        .pipe_in(&key, &[quote(10), quote(20), quote(30)])
        .unwrap();
    let mut wire = Wire::default();
    drain_to(session.as_ref(), &mut wire, 100).unwrap();

    let client = registry();
    let remote = Arc::new(PipeSession::new(Arc::new(NoopHandler)));
    client.register_external(key, &remote);
    let outcome = SessionCodec::new(client, payloads())
        .parse(&wire.0, Instant::now())
        .unwrap();

    assert_eq!(prices(&outcome.events), vec![10, 20, 30]);
    assert_eq!(remote.pipe_sequence(), session.pipe_sequence());
}

#[test]
fn any_split_yields_the_same_events() {
    let key: PipeKey = "Ab12Cd".parse().unwrap();
    let mut wire = BytesMut::new();
    for price in [5, 15, 25] {
        encode_event(&key, quote(price).as_ref(), &mut wire).unwrap();
        encode_status(&key, PipeStatus::Ok, &mut wire);
    }
    let codec = SessionCodec::new(registry(), payloads());

    for split in 0..=wire.len() {
        let first = codec.parse(&wire[..split], Instant::now()).unwrap();
        let mut carry = wire[first.consumed..split].to_vec();
        carry.extend_from_slice(&wire[split..]);
        let second = codec.parse(&carry, Instant::now()).unwrap();

        let mut events = first.events;
        events.extend(second.events);
        assert_eq!(prices(&events), vec![5, 15, 25], "split at {split}");
        assert_eq!(first.consumed + second.consumed, wire.len());
    }
}

#[test]
fn important_item_jumps_the_queue_above_threshold() {
    let registry = registry();
    let (key, session) = open(&registry);
    let mut batch: Vec<Arc<dyn PipeEvent>> = (0..100).map(quote).collect();
    batch.push(Arc::new(Alert { id: 101 }));

    let outcome = registry.pipe_in(&key, &batch).unwrap();
    assert!(outcome.resorted);
    let pending = session.clone_pending(|_| true);
    assert_eq!(pending[0].tag(), "Alert");
    assert_eq!(pending.len(), 101);
}

#[test]
fn at_threshold_no_resort() {
    let registry = registry();
    let (key, session) = open(&registry);
    let mut batch: Vec<Arc<dyn PipeEvent>> = (0..99).map(quote).collect();
    batch.push(Arc::new(Alert { id: 100 }));

    assert!(!registry.pipe_in(&key, &batch).unwrap().resorted);
    assert_eq!(session.clone_pending(|_| true)[99].tag(), "Alert");
}

#[test]
fn replay_guard_rejects_equal_hash() {
    let registry = registry();
    let (key, _) = open(&registry);
    assert!(registry.lookup_with_replay_guard(&key, 5).is_some());
    assert!(registry.lookup_with_replay_guard(&key, 5).is_none());

    let (other, _) = open(&registry);
    assert!(registry.lookup_with_replay_guard(&other, 5).is_some());
    assert!(registry.lookup_with_replay_guard(&other, 6).is_some());
}

#[test]
fn broken_idle_session_is_destroyed_by_next_sweep() {
    let registry = registry();
    let (broken_key, broken) = open(&registry);
    let (healthy_key, healthy) = open(&registry);
    let start = Instant::now();

    for _ in 0..3 {
        broken.record_failure();
    }
    let tick = start + registry.config().notify_interval * 3 + Duration::from_secs(1);
    healthy.record_traffic(tick - Duration::from_secs(10));

    let report = registry.sweep_at(tick);
    assert_eq!(report.scheduled, 1);
    assert!(registry.lookup(&broken_key).is_none());
    registry.run_pending_destroys();
    assert!(broken.is_destroyed());

    for step in 1..=10 {
        let now = tick + Duration::from_secs(10 * step);
        healthy.record_traffic(now - Duration::from_secs(5));
        registry.sweep_at(now);
    }
    assert!(registry.lookup(&healthy_key).is_some());
    assert!(healthy.is_live());
}

#[test]
fn heartbeat_encodes_exactly_and_parses_to_no_events() {
    let registry = registry();
    let key: PipeKey = "Ab12Cd".parse().unwrap();
    let session = Arc::new(PipeSession::new(Arc::new(NoopHandler)));
    registry.register_external(key, &session);

    let mut wire = BytesMut::new();
    encode_status(&key, PipeStatus::Ok, &mut wire);
    assert_eq!(wire.as_ref(), b"Ab12Cdo");

    let now = Instant::now();
    let outcome = SessionCodec::new(registry, payloads())
        .parse(&wire, now)
        .unwrap();
    assert!(outcome.events.is_empty());
    assert_eq!(outcome.consumed, 7);
    assert_eq!(session.timers().last_pipe_data_received, Some(now));
}

#[test]
fn transfer_moves_pending_without_sequence_acks() {
    let registry = registry();
    let (from, source) = open(&registry);
    let (to, target) = open(&registry);
    registry
        .pipe_in(&from, &[quote(1), status(1, "x"), quote(2)])
        .unwrap();

    let moved = registry
        .transfer_pending(&from, &to, |item| item.tag() == "Quote", true)
        .unwrap();
    assert_eq!(moved, 2);
    assert_eq!(source.pending_len(), 0);
    assert_eq!(target.pending_len(), 2);
}

#[test]
fn statistics_report_counts_pipes() {
    let registry = registry();
    let (key, _) = open(&registry);
    registry.pipe_in(&key, &[quote(1)]).unwrap();
    let report = registry.statistics();
    assert!(report.starts_with("Pipe monitor\nTotal pipe count: 1\n"));
    assert!(report.contains(&format!("Pipe {key}: buffer size 1, alive true")));
    assert_eq!(registry.snapshot()[0].pending, 1);
}
