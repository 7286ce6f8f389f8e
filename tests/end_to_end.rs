//! End-to-end publishing against an in-process collector stub.

use std::{
    collections::HashSet,
    io::Write,
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

use metricpub::{
    DiagnosticStream, Instrumentation, Publisher, PublisherBuilder, PublisherConfig, Session,
};
use rstest::rstest;
use serde_json::json;
use tempfile::NamedTempFile;

mod test_utils;
use test_utils::{CollectorStub, SharedBuf, StubOptions};

const IDLE_RECONNECT_MS: u64 = 60_000;

fn builder_for(stub: &CollectorStub, diagnostics: &SharedBuf) -> PublisherBuilder {
    Publisher::builder()
        .with_data_endpoint(stub.data_endpoint.clone())
        .with_handshake_endpoint(stub.handshake_endpoint.clone())
        .with_reconnect_interval_ms(IDLE_RECONNECT_MS)
        .with_diagnostics(DiagnosticStream::from_writer(diagnostics.clone()))
}

#[rstest]
fn concurrent_senders_use_distinct_sessions() {
    let stub = CollectorStub::start(StubOptions::default());
    let diagnostics = SharedBuf::default();
    let publisher = Arc::new(
        builder_for(&stub, &diagnostics)
            .with_pool_size(2)
            .build()
            .expect("build publisher"),
    );

    let barrier = Arc::new(Barrier::new(2));
    let producers: Vec<_> = (0..2)
        .map(|n| {
            let publisher = Arc::clone(&publisher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                publisher
                    .send_message(&json!({ "producer": n }))
                    .expect("encodable");
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer thread");
    }

    let received = stub.recv_n(2, Duration::from_secs(5));
    let connections: HashSet<_> = received.iter().map(|r| r.connection).collect();
    assert_eq!(connections.len(), 2, "each message used its own session");
    assert_eq!(stub.data_connects(), 2);
    assert_eq!(stub.handshakes(), 2);
    assert_eq!(diagnostics.contents(), "");
}

#[rstest]
fn late_handshake_drops_message_until_reconnect_tick() {
    let stub = CollectorStub::start(StubOptions {
        handshake_delays: vec![Duration::from_millis(400)],
        ..StubOptions::default()
    });
    let diagnostics = SharedBuf::default();
    let publisher = builder_for(&stub, &diagnostics)
        .with_pool_size(1)
        .with_handshake_timeout_ms(150)
        .with_reconnect_interval_ms(300)
        .build()
        .expect("build publisher");

    let start = Instant::now();
    publisher.send_encoded(b"first".to_vec());
    assert!(start.elapsed() >= Duration::from_millis(140));
    assert_eq!(diagnostics.lines(), ["first"]);

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let healed = publisher
            .pool()
            .try_checkout()
            .is_some_and(|session| session.is_connected());
        if healed {
            break;
        }
        assert!(Instant::now() < deadline, "reconnect tick never healed the session");
        thread::sleep(Duration::from_millis(20));
    }

    publisher.send_encoded(b"second".to_vec());
    let received = stub.recv(Duration::from_secs(2)).expect("second frame arrives");
    assert_eq!(received.payload, b"second");
    assert_eq!(diagnostics.lines(), ["first"]);
    assert!(stub.recv(Duration::from_millis(100)).is_none(), "first was dropped");
}

#[rstest]
fn silent_control_endpoint_triggers_reconnect_within_one_timeout() {
    let stub = CollectorStub::start(StubOptions {
        answer_probes: false,
        ..StubOptions::default()
    });
    let diagnostics = SharedBuf::default();
    let start = Instant::now();
    let publisher = builder_for(&stub, &diagnostics)
        .with_pool_size(1)
        .with_control_endpoint(stub.control_endpoint.clone())
        .with_probe_timeout_ms(250)
        .with_probe_retries(1)
        .build()
        .expect("build publisher");

    publisher.send_message(&json!({"warm": true})).expect("encodable");
    stub.recv(Duration::from_secs(2)).expect("warm-up frame arrives");

    let deadline = start + Duration::from_secs(3);
    let forced_at = loop {
        let forced = publisher
            .pool()
            .try_checkout()
            .is_some_and(|session| !session.is_connected());
        if forced {
            break start.elapsed();
        }
        assert!(Instant::now() < deadline, "prober never forced a reconnect");
        thread::sleep(Duration::from_millis(10));
    };
    assert!(forced_at >= Duration::from_millis(240), "forced too early: {forced_at:?}");
    assert!(forced_at < Duration::from_millis(900), "forced too late: {forced_at:?}");
    assert!(stub.probes() >= 1);

    publisher.send_message(&json!({"after": true})).expect("encodable");
    stub.recv(Duration::from_secs(2)).expect("publisher recovers");
    assert_eq!(stub.handshakes(), 2);
}

#[rstest]
fn async_delivery_reaches_the_collector() {
    let stub = CollectorStub::start(StubOptions::default());
    let diagnostics = SharedBuf::default();
    let publisher = builder_for(&stub, &diagnostics)
        .with_pool_size(1)
        .with_async_delivery(true)
        .with_queue_capacity(16)
        .build()
        .expect("build publisher");

    for n in 0..5 {
        publisher.send_message(&json!({ "n": n })).expect("encodable");
    }
    let received = stub.recv_n(5, Duration::from_secs(5));
    let payloads: Vec<_> = received
        .iter()
        .map(|r| String::from_utf8_lossy(&r.payload).into_owned())
        .collect();
    assert_eq!(
        payloads,
        [r#"{"n":0}"#, r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#, r#"{"n":4}"#]
    );
    publisher.close();
}

#[rstest]
fn debug_stderr_mirrors_delivered_messages() {
    let stub = CollectorStub::start(StubOptions::default());
    let diagnostics = SharedBuf::default();
    let publisher = builder_for(&stub, &diagnostics)
        .with_pool_size(1)
        .with_debug_stderr(true)
        .build()
        .expect("build publisher");

    publisher.send_message(&json!({"mirrored": 1})).expect("encodable");
    stub.recv(Duration::from_secs(2)).expect("frame arrives");
    assert_eq!(diagnostics.lines(), [r#"{"mirrored":1}"#]);
}

#[rstest]
fn unreachable_collector_never_fails_the_caller() {
    let diagnostics = SharedBuf::default();
    let publisher = Publisher::builder()
        .with_data_endpoint("tcp://127.0.0.1:1")
        .with_pool_size(1)
        .with_reconnect_interval_ms(IDLE_RECONNECT_MS)
        .with_diagnostics(DiagnosticStream::from_writer(diagnostics.clone()))
        .build()
        .expect("construction does not touch the network");

    publisher.send_message(&json!({"lost": 1})).expect("encodable");
    publisher.send_message(&json!({"lost": 2})).expect("encodable");
    assert_eq!(diagnostics.lines(), [r#"{"lost":1}"#, r#"{"lost":2}"#]);
    assert_eq!(publisher.pool().dropped(), 2);
}

#[rstest]
fn configuration_file_drives_instrumentation() {
    let stub = CollectorStub::start(StubOptions::default());
    let mut file = NamedTempFile::new().expect("create temp ini file");
    writeln!(
        file,
        "[metricpub]\nenabled = true\ndata_endpoints = {}\nhandshake_endpoint = \"{}\"\npool_size = 1\nencoding = msgpack",
        stub.data_endpoint, stub.handshake_endpoint
    )
    .expect("write ini contents");

    let config = PublisherConfig::from_ini_file(file.path(), "metricpub").expect("valid config");
    let instrumentation = Instrumentation::from_config(&config).expect("build instrumentation");
    assert!(instrumentation.is_enabled());

    instrumentation
        .send_message(&json!({"type": "counter", "value": 1}))
        .expect("encodable");
    let received = stub.recv(Duration::from_secs(2)).expect("frame arrives");
    let decoded: serde_json::Value = metricpub::Encoding::MsgPack
        .decode(&received.payload)
        .expect("msgpack payload");
    assert_eq!(decoded, json!({"type": "counter", "value": 1}));
    instrumentation.close();
}
