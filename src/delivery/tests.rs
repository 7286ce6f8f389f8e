//! Tests for the asynchronous delivery queue.

use std::{
    io::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rstest::rstest;

use crate::{
    diagnostics::DiagnosticStream,
    error::{BuildError, TransportError},
    transport::Session,
};

use super::{
    AsyncDeliveryQueue, DeliveryConfig, EnqueueError, OverflowPolicy, SessionSender, Transmit,
};

/// Target that records payloads and blocks while the test holds `gate`.
#[derive(Clone, Default)]
struct Recorder {
    delivered: Arc<Mutex<Vec<Vec<u8>>>>,
    gate: Arc<Mutex<()>>,
    reconnects: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Recorder {
    fn delivered(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    fn wait_for(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while self.delivered.lock().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Transmit for Recorder {
    fn transmit(&mut self, payload: &[u8]) -> bool {
        let _open = self.gate.lock();
        self.delivered.lock().push(payload.to_vec());
        true
    }

    fn reconnect(&mut self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn spawn_queue(
    capacity: usize,
    overflow: OverflowPolicy,
) -> (AsyncDeliveryQueue, Recorder, Capture) {
    let recorder = Recorder::default();
    let capture = Capture::default();
    let queue = AsyncDeliveryQueue::spawn(
        recorder.clone(),
        DeliveryConfig {
            capacity,
            overflow,
            ..DeliveryConfig::default()
        },
        DiagnosticStream::from_writer(capture.clone()),
    )
    .expect("spawn queue");
    (queue, recorder, capture)
}

/// Park the delivery thread inside `transmit` and fill the queue.
fn stall_and_fill(queue: &AsyncDeliveryQueue, recorder: &Recorder, fill: &[&str]) {
    queue.enqueue(b"in-flight".to_vec()).expect("first enqueue");
    let deadline = Instant::now() + Duration::from_secs(2);
    while queue.pending() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(queue.pending(), 0, "delivery thread picked up the first message");
    assert!(recorder.gate.is_locked());
    for payload in fill {
        queue.enqueue(payload.as_bytes().to_vec()).expect("fill enqueue");
    }
}

#[rstest]
fn delivers_in_enqueue_order() {
    let (queue, recorder, _) = spawn_queue(8, OverflowPolicy::DropNewest);
    for n in 0..5 {
        queue.enqueue(format!("m{n}").into_bytes()).expect("enqueue");
    }
    recorder.wait_for(5);
    assert_eq!(recorder.delivered(), ["m0", "m1", "m2", "m3", "m4"]);
}

#[rstest]
fn drop_newest_rejects_when_full() {
    let (queue, recorder, capture) = spawn_queue(2, OverflowPolicy::DropNewest);
    let gate = recorder.gate.lock();
    stall_and_fill(&queue, &recorder, &["b", "c"]);

    assert_eq!(queue.enqueue(b"d".to_vec()), Err(EnqueueError::QueueFull));
    assert_eq!(queue.pending(), 2);
    assert_eq!(capture.contents(), "d\n");
    assert_eq!(queue.dropped(), 1);

    drop(gate);
    recorder.wait_for(3);
    assert_eq!(recorder.delivered(), ["in-flight", "b", "c"]);
}

#[rstest]
fn drop_oldest_evicts_to_admit_new_message() {
    let (queue, recorder, capture) = spawn_queue(2, OverflowPolicy::DropOldest);
    let gate = recorder.gate.lock();
    stall_and_fill(&queue, &recorder, &["b", "c"]);

    assert_eq!(queue.enqueue(b"d".to_vec()), Ok(()));
    assert_eq!(queue.pending(), 2);
    assert_eq!(capture.contents(), "b\n");

    drop(gate);
    recorder.wait_for(3);
    assert_eq!(recorder.delivered(), ["in-flight", "c", "d"]);
}

#[rstest]
fn timeout_policy_waits_before_dropping() {
    let (queue, recorder, capture) =
        spawn_queue(1, OverflowPolicy::Timeout(Duration::from_millis(60)));
    let _gate = recorder.gate.lock();
    stall_and_fill(&queue, &recorder, &["b"]);

    let start = Instant::now();
    assert_eq!(queue.enqueue(b"c".to_vec()), Err(EnqueueError::QueueFull));
    assert!(start.elapsed() >= Duration::from_millis(55));
    assert_eq!(capture.contents(), "c\n");
}

#[rstest]
fn shutdown_discards_queued_messages() {
    let (queue, recorder, capture) = spawn_queue(4, OverflowPolicy::DropNewest);
    let gate = recorder.gate.lock();
    stall_and_fill(&queue, &recorder, &["b", "c"]);

    queue.flags.shutdown.store(true, Ordering::Release);
    drop(gate);
    queue.shutdown();

    assert_eq!(recorder.delivered(), ["in-flight"]);
    assert!(recorder.closed.load(Ordering::SeqCst));
    assert_eq!(queue.enqueue(b"late".to_vec()), Err(EnqueueError::Closed));
    assert_eq!(capture.contents(), "late\n");
}

#[rstest]
fn shutdown_is_idempotent() {
    let (queue, recorder, _) = spawn_queue(4, OverflowPolicy::DropNewest);
    queue.shutdown();
    queue.shutdown();
    assert!(queue.is_shut_down());
    assert!(recorder.closed.load(Ordering::SeqCst));
}

#[rstest]
fn reconnect_request_reaches_the_target() {
    let (queue, recorder, _) = spawn_queue(4, OverflowPolicy::DropNewest);
    let flag = queue.reconnect_flag();
    flag.request();

    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.reconnects.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 1);

    queue.request_reconnect();
    let deadline = Instant::now() + Duration::from_secs(2);
    while recorder.reconnects.load(Ordering::SeqCst) == 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(recorder.reconnects.load(Ordering::SeqCst), 2);
}

#[rstest]
fn zero_capacity_is_rejected() {
    let result = AsyncDeliveryQueue::spawn(
        Recorder::default(),
        DeliveryConfig {
            capacity: 0,
            ..DeliveryConfig::default()
        },
        DiagnosticStream::stderr(),
    );
    assert!(
        matches!(result, Err(BuildError::InvalidConfig(msg)) if msg.contains("queue_capacity"))
    );
}

struct FlakySession {
    fail: bool,
    connects: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    connected: bool,
}

impl Session for FlakySession {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, _payload: &[u8]) -> Result<(), TransportError> {
        if self.fail {
            self.connected = false;
            return Err(TransportError::Io(io::ErrorKind::ConnectionReset.into()));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.disconnect();
    }
}

#[rstest]
#[case(false, true, "")]
#[case(true, false, "payload\n")]
fn session_sender_reports_failed_sends(
    #[case] fail: bool,
    #[case] accepted: bool,
    #[case] diagnostics: &str,
) {
    let capture = Capture::default();
    let connects = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let mut sender = SessionSender::new(
        FlakySession {
            fail,
            connects: Arc::clone(&connects),
            closed: Arc::clone(&closed),
            connected: false,
        },
        DiagnosticStream::from_writer(capture.clone()),
    );

    assert_eq!(sender.transmit(b"payload"), accepted);
    assert_eq!(capture.contents(), diagnostics);

    sender.reconnect();
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    sender.close();
    assert!(closed.load(Ordering::SeqCst));
}
