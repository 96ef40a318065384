use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardrelay_core::{Command, ReceiverId, ReceiverLifecycle, Reply};
use cardrelay_engine::{Prober, ReceiverRegistry, RetryPolicy, Transport, TransportError};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

const TAB: ReceiverId = 7;

/// Answers pings from a script; the last entry repeats forever.
struct ScriptedTransport {
    script: Vec<Result<bool, ()>>,
    sends: AtomicU32,
    sent_at: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<bool, ()>>) -> Arc<Self> {
        Arc::new(Self {
            script,
            sends: AtomicU32::new(0),
            sent_at: Mutex::new(Vec::new()),
        })
    }

    fn absent() -> Arc<Self> {
        Self::new(vec![Err(())])
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    fn gaps(&self) -> Vec<Duration> {
        let sent_at = self.sent_at.lock().unwrap();
        sent_at.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, receiver: ReceiverId, command: Command) -> Result<Reply, TransportError> {
        assert!(matches!(command, Command::Ping { .. }));
        let index = self.sends.fetch_add(1, Ordering::SeqCst) as usize;
        self.sent_at.lock().unwrap().push(Instant::now());
        let step = self.script[index.min(self.script.len() - 1)];
        match step {
            Ok(ready) => Ok(Reply::Pong {
                ready,
                timestamp: 0,
            }),
            Err(()) => Err(TransportError::NoReceiver(receiver)),
        }
    }
}

fn setup(transport: Arc<ScriptedTransport>, url: &str) -> (Prober, Arc<ReceiverRegistry>) {
    relay_logging::initialize_for_tests();
    let registry = Arc::new(ReceiverRegistry::new());
    registry.resolve(TAB, Some(url));
    (Prober::new(transport, Arc::clone(&registry)), registry)
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_millis(1000))
}

#[tokio::test(start_paused = true)]
async fn absent_receiver_exhausts_exactly_the_budget() {
    let transport = ScriptedTransport::absent();
    let (prober, registry) = setup(Arc::clone(&transport), "https://example.com/article");

    let started = Instant::now();
    assert!(!prober.probe(TAB, &policy()).await);

    assert_eq!(transport.sends(), 5);
    assert!(transport
        .gaps()
        .iter()
        .all(|gap| *gap >= Duration::from_millis(1000)));
    assert!(started.elapsed() <= Duration::from_millis(5000));
    assert_eq!(registry.lifecycle(TAB), Some(ReceiverLifecycle::Unknown));
}

#[tokio::test(start_paused = true)]
async fn restricted_page_is_never_probed() {
    let transport = ScriptedTransport::absent();
    let (prober, registry) = setup(Arc::clone(&transport), "chrome://settings");

    assert!(!prober.probe(TAB, &policy()).await);
    assert_eq!(transport.sends(), 0);
    assert_eq!(registry.lifecycle(TAB), Some(ReceiverLifecycle::Unknown));
}

#[tokio::test(start_paused = true)]
async fn initialized_receiver_needs_no_ping() {
    let transport = ScriptedTransport::absent();
    let (prober, registry) = setup(Arc::clone(&transport), "https://example.com");
    assert!(registry.mark_ready(TAB, Some(true)));

    assert!(prober.probe(TAB, &policy()).await);
    assert_eq!(transport.sends(), 0);
}

#[tokio::test(start_paused = true)]
async fn receiver_becoming_ready_mid_probe_succeeds() {
    let transport = ScriptedTransport::new(vec![Err(()), Ok(false), Ok(true)]);
    let (prober, registry) = setup(Arc::clone(&transport), "https://example.com");

    assert!(prober.probe(TAB, &policy()).await);
    assert_eq!(transport.sends(), 3);
    assert_eq!(registry.lifecycle(TAB), Some(ReceiverLifecycle::Ready));
    assert!(registry.snapshot(TAB).unwrap().last_ready_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn initialization_racing_the_probe_is_observed() {
    // The receiver never answers pings itself; its handshake lands between attempts.
    let transport = ScriptedTransport::new(vec![Ok(false)]);
    let (prober, registry) = setup(Arc::clone(&transport), "https://example.com");

    let handshake = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            registry.mark_ready(TAB, Some(false))
        })
    };

    assert!(prober.probe(TAB, &policy()).await);
    assert!(handshake.await.unwrap());
    assert_eq!(transport.sends(), 2);
    assert_eq!(registry.lifecycle(TAB), Some(ReceiverLifecycle::Hidden));
}

#[tokio::test(start_paused = true)]
async fn torn_down_receiver_aborts_probe() {
    let transport = ScriptedTransport::absent();
    let (prober, registry) = setup(Arc::clone(&transport), "https://example.com");

    let teardown = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            registry.tear_down(TAB)
        })
    };

    assert!(!prober.probe(TAB, &policy()).await);
    assert!(teardown.await.unwrap().is_some());
    assert_eq!(transport.sends(), 1);
    assert_eq!(registry.lifecycle(TAB), None);
}
