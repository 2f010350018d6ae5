//! End-to-end tests of the delivery pipeline
//!
//! A recording transport stands in for the messaging platform. Timing tests
//! run on Tokio's paused clock, so delays are virtual and exact.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;
use uuid::Uuid;

use chat_delivery_service::delivery::{
    Chunk, DeliveryConfig, DeliveryDispatcher, DeliveryError, InteractivePayload, RecipientKey,
    ShutdownMode,
};
use chat_delivery_service::transport::{SendResult, Transport, TransportError};

const DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Sent {
    key: RecipientKey,
    message_id: Uuid,
    index: usize,
    text: String,
    has_payload: bool,
    at: Instant,
}

/// Records every send; per-key scripts override the default `Delivered`.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    scripts: Mutex<HashMap<RecipientKey, VecDeque<SendResult>>>,
}

impl RecordingTransport {
    fn script(&self, key: i64, results: Vec<SendResult>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(RecipientKey::new(key), results.into());
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self, key: i64) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| s.key == RecipientKey::new(key))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, chunk: &Chunk) -> SendResult {
        self.sent.lock().unwrap().push(Sent {
            key: chunk.key,
            message_id: chunk.message_id,
            index: chunk.index,
            text: chunk.text.clone(),
            has_payload: chunk.payload.is_some(),
            at: Instant::now(),
        });

        self.scripts
            .lock()
            .unwrap()
            .get_mut(&chunk.key)
            .and_then(|script| script.pop_front())
            .unwrap_or(SendResult::Delivered)
    }
}

fn config(max_chunk_length: usize, delay: Duration, max_retries: u32) -> DeliveryConfig {
    DeliveryConfig {
        max_chunk_length,
        min_delay_between_sends: delay,
        max_retries,
    }
}

fn setup(config: DeliveryConfig) -> (DeliveryDispatcher, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = DeliveryDispatcher::new(config, transport.clone());
    (dispatcher, transport)
}

fn assert_spaced(sends: &[Sent], min: Duration) {
    for pair in sends.windows(2) {
        assert!(
            pair[1].at - pair[0].at >= min,
            "sends {:?} and {:?} closer than {:?}",
            pair[0].text,
            pair[1].text,
            min
        );
    }
}

// ============================================================================
// Ordering & spacing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_key_preserves_submission_order() {
    let (dispatcher, transport) = setup(config(4096, Duration::from_millis(10), 3));

    for i in 0..1000 {
        dispatcher.send(7, format!("message {}", i), None).unwrap();
    }
    dispatcher.wait_idle().await;

    let texts: Vec<String> = transport.sent().into_iter().map(|s| s.text).collect();
    let expected: Vec<String> = (0..1000).map(|i| format!("message {}", i)).collect();
    assert_eq!(texts, expected);
}

#[tokio::test(start_paused = true)]
async fn test_chunks_of_one_message_are_contiguous_and_ordered() {
    let (dispatcher, transport) = setup(config(10, DELAY, 3));

    let long = dispatcher.send(1, "a".repeat(35), None).unwrap();
    let short = dispatcher.send(1, "tail", None).unwrap();
    assert_eq!(long.chunks, 4);
    dispatcher.wait_idle().await;

    let sent = transport.sent();
    let indices: Vec<(Uuid, usize)> = sent.iter().map(|s| (s.message_id, s.index)).collect();
    assert_eq!(
        indices,
        vec![
            (long.message_id, 0),
            (long.message_id, 1),
            (long.message_id, 2),
            (long.message_id, 3),
            (short.message_id, 0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_minimum_spacing_between_sends() {
    let (dispatcher, transport) = setup(config(5, DELAY, 3));

    dispatcher.send(3, "abcdefghijklmnopqrstuvwxy", None).unwrap();
    dispatcher.send(3, "second", None).unwrap();
    dispatcher.wait_idle().await;

    let sent = transport.sent_to(3);
    assert_eq!(sent.len(), 7);
    assert_spaced(&sent, DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_spacing_holds_for_message_sent_during_cooldown() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));

    dispatcher.send(4, "first", None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.sent_to(4).len(), 1);

    dispatcher.send(4, "second", None).unwrap();
    dispatcher.wait_idle().await;

    assert_spaced(&transport.sent_to(4), DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_keys_progress_independently() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));
    let keys = 5;
    let per_key = 4;

    let start = Instant::now();
    for round in 0..per_key {
        for key in 0..keys {
            dispatcher.send(key, format!("{}-{}", key, round), None).unwrap();
        }
    }
    dispatcher.wait_idle().await;
    let elapsed = start.elapsed();

    // Serialized delivery would take keys * per_key * DELAY
    assert!(elapsed >= DELAY * (per_key - 1) as u32);
    assert!(elapsed < DELAY * (per_key + 1) as u32, "took {:?}", elapsed);

    for key in 0..keys {
        let texts: Vec<String> = transport.sent_to(key).into_iter().map(|s| s.text).collect();
        let expected: Vec<String> = (0..per_key).map(|r| format!("{}-{}", key, r)).collect();
        assert_eq!(texts, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_producers_on_plain_threads_keep_their_own_order() {
    let (dispatcher, transport) = setup(config(4096, Duration::ZERO, 3));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || {
                for i in 0..250 {
                    dispatcher.send(42, format!("{}:{}", p, i), None).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    dispatcher.wait_idle().await;

    let sent = transport.sent_to(42);
    assert_eq!(sent.len(), 1000);
    for p in 0..4 {
        let prefix = format!("{}:", p);
        let seq: Vec<usize> = sent
            .iter()
            .filter_map(|s| s.text.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seq, (0..250).collect::<Vec<_>>());
    }
}

// ============================================================================
// Throttling & failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_throttled_chunk_retried_then_dropped_and_queue_continues() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 2));
    let wait = Duration::from_secs(5);
    transport.script(
        9,
        vec![
            SendResult::throttled(wait),
            SendResult::throttled(wait),
            SendResult::throttled(wait),
        ],
    );

    dispatcher.send(9, "first", None).unwrap();
    dispatcher.send(9, "second", None).unwrap();
    dispatcher.wait_idle().await;

    let sent = transport.sent_to(9);
    let texts: Vec<&str> = sent.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "first", "first", "second"]);
    assert!(sent[1].at - sent[0].at >= wait);
    assert!(sent[2].at - sent[1].at >= wait);
    assert!(sent[3].at - sent[2].at >= DELAY);

    let stats = dispatcher.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.chunks_delivered, 1);
    assert_eq!(stats.throttle_retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_chunk_delivered_after_wait() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));
    transport.script(8, vec![SendResult::throttled(Duration::from_secs(30))]);

    dispatcher.send(8, "patience", None).unwrap();
    dispatcher.wait_idle().await;

    let sent = transport.sent_to(8);
    assert_eq!(sent.len(), 2);
    assert!(sent[1].at - sent[0].at >= Duration::from_secs(30));
    assert_eq!(dispatcher.stats().chunks_delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_one_key_does_not_stall_another() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));
    transport.script(1, vec![SendResult::throttled(Duration::from_secs(60))]);

    dispatcher.send(1, "slow", None).unwrap();
    dispatcher.send(2, "fast", None).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(transport.sent_to(2).len(), 1);
    assert_eq!(transport.sent_to(1).len(), 1);
    assert_eq!(dispatcher.pending_for(1), 0);
    assert_eq!(dispatcher.active_queues(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_failure_drops_chunk_and_continues() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));
    transport.script(
        5,
        vec![SendResult::Failed(TransportError::Rejected {
            status: 403,
            description: "bot was blocked by the user".to_string(),
        })],
    );

    dispatcher.send(5, "one", None).unwrap();
    dispatcher.send(5, "two", None).unwrap();
    dispatcher.send(5, "three", None).unwrap();
    dispatcher.wait_idle().await;

    assert_eq!(transport.sent_to(5).len(), 3);
    let stats = dispatcher.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.chunks_delivered, 2);
    assert_eq!(stats.throttle_retries, 0);
}

/// Panics on its first send, then records like [`RecordingTransport`].
#[derive(Default)]
struct PanicOnFirstSend {
    panicked: AtomicBool,
    inner: RecordingTransport,
}

#[async_trait]
impl Transport for PanicOnFirstSend {
    fn name(&self) -> &'static str {
        "panic-once"
    }

    async fn send(&self, chunk: &Chunk) -> SendResult {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("transport blew up on {}", chunk.text);
        }
        self.inner.send(chunk).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_transport_does_not_wedge_key() {
    let transport = Arc::new(PanicOnFirstSend::default());
    let dispatcher = DeliveryDispatcher::new(config(4096, DELAY, 3), transport.clone());

    dispatcher.send(1, "first", None).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    dispatcher.send(1, "second", None).unwrap();
    dispatcher.wait_idle().await;

    let texts: Vec<String> = transport.inner.sent_to(1).into_iter().map(|s| s.text).collect();
    assert_eq!(texts, vec!["second"]);

    let stats = dispatcher.stats();
    assert_eq!(stats.chunks_dropped, 1);
    assert_eq!(stats.chunks_delivered, 1);
    assert!(dispatcher.is_idle());
}

// ============================================================================
// Broadcast & payloads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_broadcast_splits_per_key_with_payload_on_first_chunk() {
    let (dispatcher, transport) = setup(config(10, DELAY, 3));
    let keyboard = InteractivePayload::inline_keyboard(vec![vec![("Open", "open")]]);

    let receipt = dispatcher.broadcast_with_payload(
        [10, 11, 12],
        &"x".repeat(20),
        Some(keyboard),
    );
    assert_eq!(receipt.accepted.len(), 3);
    assert_eq!(receipt.total_chunks(), 6);
    dispatcher.wait_idle().await;

    assert_eq!(transport.sent().len(), 6);
    for key in [10, 11, 12] {
        let sent = transport.sent_to(key);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].has_payload);
        assert!(!sent[1].has_payload);
        assert_eq!(sent[0].message_id, sent[1].message_id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_collapses_duplicate_keys() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));

    let receipt = dispatcher.broadcast([10, 11, 10, 12, 11], "hello");
    let keys: Vec<i64> = receipt.accepted.iter().map(|r| r.key.id()).collect();
    assert_eq!(keys, vec![10, 11, 12]);
    dispatcher.wait_idle().await;

    assert_eq!(transport.sent().len(), 3);
    assert_eq!(dispatcher.stats().broadcasts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_to_no_keys_is_empty() {
    let (dispatcher, _transport) = setup(config(4096, DELAY, 3));

    let receipt = dispatcher.broadcast(Vec::<i64>::new(), "nobody");
    assert!(receipt.accepted.is_empty());
    assert!(receipt.rejected.is_empty());
    assert!(dispatcher.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_send_payload_json_survives() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));
    let payload = InteractivePayload::new(json!({"inline_keyboard": []}));

    dispatcher.send(6, "with keyboard", Some(payload)).unwrap();
    dispatcher.wait_idle().await;

    assert!(transport.sent_to(6)[0].has_payload);
}

// ============================================================================
// Registry lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_queue_removed_after_cooldown() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));

    dispatcher.send(20, "hello", None).unwrap();
    assert_eq!(dispatcher.active_queues(), 1);

    tokio::time::sleep(DELAY / 2).await;
    assert_eq!(transport.sent_to(20).len(), 1);
    assert_eq!(dispatcher.active_queues(), 1);

    tokio::time::sleep(DELAY).await;
    assert_eq!(dispatcher.active_queues(), 0);
    assert_eq!(dispatcher.pending_for(20), 0);
    assert!(dispatcher.is_idle());

    // A later message gets a fresh queue and is still delivered
    dispatcher.send(20, "again", None).unwrap();
    dispatcher.wait_idle().await;
    assert_eq!(transport.sent_to(20).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_text_rejected() {
    let (dispatcher, transport) = setup(config(4096, DELAY, 3));

    assert_eq!(dispatcher.send(1, "", None).unwrap_err(), DeliveryError::EmptyMessage);
    assert_eq!(dispatcher.send(1, " \n ", None).unwrap_err(), DeliveryError::EmptyMessage);
    assert_eq!(dispatcher.active_queues(), 0);
    assert_eq!(dispatcher.stats().messages_rejected, 2);
    assert!(transport.sent().is_empty());
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_sends() {
    let (dispatcher, _transport) = setup(config(4096, DELAY, 3));

    let result = dispatcher.shutdown(ShutdownMode::Drain, Duration::from_secs(5)).await;
    assert!(result.drained);

    assert_eq!(
        dispatcher.send(1, "too late", None).unwrap_err(),
        DeliveryError::ShuttingDown
    );
    let receipt = dispatcher.broadcast([1, 2], "too late");
    assert!(receipt.accepted.is_empty());
    assert_eq!(receipt.rejected.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_drain_shutdown_delivers_backlog() {
    let (dispatcher, transport) = setup(config(10, DELAY, 3));

    dispatcher.send(30, "y".repeat(50), None).unwrap();
    let result = dispatcher.shutdown(ShutdownMode::Drain, Duration::from_secs(30)).await;

    assert!(result.drained);
    assert_eq!(result.remaining_chunks, 0);
    assert_eq!(result.active_consumers, 0);
    assert_eq!(transport.sent_to(30).len(), 5);
    assert_spaced(&transport.sent_to(30), DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_stop_after_current_drops_backlog() {
    let (dispatcher, transport) = setup(config(10, DELAY, 3));

    dispatcher.send(31, "z".repeat(50), None).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.sent_to(31).len(), 1);

    let result = dispatcher
        .shutdown(ShutdownMode::StopAfterCurrent, Duration::from_secs(30))
        .await;

    assert!(result.drained);
    assert!(result.duration < DELAY);
    assert_eq!(transport.sent_to(31).len(), 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.chunks_delivered, 1);
    assert_eq!(stats.chunks_dropped, 4);
    assert!(dispatcher.is_idle());
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_reports_leftovers() {
    let (dispatcher, transport) = setup(config(10, DELAY, 3));

    dispatcher.send(32, "w".repeat(200), None).unwrap();
    let result = dispatcher.shutdown(ShutdownMode::Drain, Duration::from_secs(3)).await;

    assert!(!result.drained);
    assert!(result.remaining_chunks > 0);

    // Once told to stop, the consumer discards what is left
    dispatcher.wait_idle().await;
    let stats = dispatcher.stats();
    assert_eq!(stats.chunks_delivered + stats.chunks_dropped, 20);
    assert!(transport.sent_to(32).len() < 20);
}
