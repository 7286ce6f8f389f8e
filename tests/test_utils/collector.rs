//! In-process collector stub.
//!
//! Listens on three loopback TCP ports:
//! - data: accepts publish connections and forwards every frame, tagged with
//!   the id of the connection it arrived on;
//! - handshake: answers each empty probe, optionally after a per-connection
//!   delay;
//! - control: echoes liveness probes, or stays silent.

use std::{
    net::{TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use metricpub::transport::{read_frame, write_frame};

const MAX_FRAME: usize = 1 << 20;

/// Behaviour of a [`CollectorStub`].
#[derive(Clone, Debug)]
pub struct StubOptions {
    /// Delay before answering the n-th handshake; later handshakes answer
    /// immediately.
    pub handshake_delays: Vec<Duration>,
    /// Whether the control endpoint answers probes.
    pub answer_probes: bool,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            handshake_delays: Vec::new(),
            answer_probes: true,
        }
    }
}

/// A frame received on the data endpoint.
#[derive(Clone, Debug)]
pub struct Received {
    pub connection: usize,
    pub payload: Vec<u8>,
}

pub struct CollectorStub {
    pub data_endpoint: String,
    pub handshake_endpoint: String,
    pub control_endpoint: String,
    frames: mpsc::Receiver<Received>,
    data_connects: Arc<AtomicUsize>,
    handshakes: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
}

fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind stub listener");
    let addr = listener.local_addr().expect("stub listener address");
    (listener, format!("tcp://{addr}"))
}

#[allow(dead_code)]
impl CollectorStub {
    pub fn start(options: StubOptions) -> Self {
        let (data, data_endpoint) = bind();
        let (handshake, handshake_endpoint) = bind();
        let (control, control_endpoint) = bind();
        let (frames_tx, frames) = mpsc::channel();
        let data_connects = Arc::new(AtomicUsize::new(0));
        let handshakes = Arc::new(AtomicUsize::new(0));
        let probes = Arc::new(AtomicUsize::new(0));

        serve_data(data, Arc::clone(&data_connects), frames_tx);
        serve_handshakes(handshake, Arc::clone(&handshakes), options.handshake_delays);
        serve_control(control, Arc::clone(&probes), options.answer_probes);

        Self {
            data_endpoint,
            handshake_endpoint,
            control_endpoint,
            frames,
            data_connects,
            handshakes,
            probes,
        }
    }

    /// Wait up to `timeout` for the next data frame.
    pub fn recv(&self, timeout: Duration) -> Option<Received> {
        self.frames.recv_timeout(timeout).ok()
    }

    /// Collect `count` frames, panicking if they do not arrive in time.
    pub fn recv_n(&self, count: usize, timeout: Duration) -> Vec<Received> {
        let deadline = Instant::now() + timeout;
        (0..count)
            .map(|n| {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.recv(remaining)
                    .unwrap_or_else(|| panic!("frame {n} of {count} did not arrive"))
            })
            .collect()
    }

    pub fn data_connects(&self) -> usize {
        self.data_connects.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

fn serve_data(listener: TcpListener, connects: Arc<AtomicUsize>, frames: mpsc::Sender<Received>) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            let connection = connects.fetch_add(1, Ordering::SeqCst);
            let frames = frames.clone();
            thread::spawn(move || {
                while let Ok(payload) = read_frame(&mut stream, MAX_FRAME) {
                    let received = Received {
                        connection,
                        payload,
                    };
                    if frames.send(received).is_err() {
                        return;
                    }
                }
            });
        }
    });
}

fn serve_handshakes(listener: TcpListener, count: Arc<AtomicUsize>, delays: Vec<Duration>) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            let n = count.fetch_add(1, Ordering::SeqCst);
            let delay = delays.get(n).copied().unwrap_or_default();
            thread::spawn(move || {
                if read_frame(&mut stream, MAX_FRAME).is_ok() {
                    thread::sleep(delay);
                    let _ = write_frame(&mut stream, b"ready", MAX_FRAME);
                }
            });
        }
    });
}

fn serve_control(listener: TcpListener, probes: Arc<AtomicUsize>, answer: bool) {
    thread::spawn(move || {
        let mut held: Vec<TcpStream> = Vec::new();
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            if !answer {
                if read_frame(&mut stream, MAX_FRAME).is_ok() {
                    probes.fetch_add(1, Ordering::SeqCst);
                }
                held.push(stream);
                continue;
            }
            let probes = Arc::clone(&probes);
            thread::spawn(move || {
                while let Ok(request) = read_frame(&mut stream, MAX_FRAME) {
                    probes.fetch_add(1, Ordering::SeqCst);
                    if write_frame(&mut stream, &request, MAX_FRAME).is_err() {
                        return;
                    }
                }
            });
        }
    });
}
