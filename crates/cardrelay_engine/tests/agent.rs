use std::sync::Arc;
use std::time::Duration;

use cardrelay_core::{AgentPhase, Command, ReceiverId, Reply};
use cardrelay_engine::{
    spawn_agent, Envelope, LocalHub, Presenter, PreviewError, RetryPolicy, RuntimeEvent, Transport,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TAB: ReceiverId = 5;

struct NoopPresenter;

#[async_trait::async_trait]
impl Presenter for NoopPresenter {
    async fn show_preview(&self, _image_ref: &str) -> Result<(), PreviewError> {
        Ok(())
    }
}

fn identity() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

async fn next_event(runtime_rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    timeout(Duration::from_secs(5), runtime_rx.recv())
        .await
        .expect("agent reported in time")
        .expect("hub alive")
}

async fn ping(hub: &LocalHub) -> bool {
    match hub.send(TAB, Command::Ping { timestamp: 1 }).await {
        Ok(Reply::Pong { ready, timestamp }) => {
            assert_eq!(timestamp, 1);
            ready
        }
        other => panic!("unexpected ping answer {other:?}"),
    }
}

#[tokio::test]
async fn handshake_makes_the_agent_ready() {
    relay_logging::initialize_for_tests();
    let (hub, mut runtime_rx) = LocalHub::new(Duration::from_secs(1));
    let mut agent = spawn_agent(hub.link(TAB), Arc::new(NoopPresenter), identity(), true);

    let query = next_event(&mut runtime_rx).await;
    assert_eq!(query.sender, TAB);
    let RuntimeEvent::IdentityQuery { reply } = query.event else {
        panic!("expected an identity query first");
    };
    // Still initializing: pings are answered, but truthfully.
    assert!(!ping(&hub).await);

    reply.send(TAB).expect("agent waits for identity");
    let announced = next_event(&mut runtime_rx).await;
    assert!(matches!(
        announced.event,
        RuntimeEvent::Initialized { visible: true }
    ));
    assert_eq!(agent.settled().await, AgentPhase::Ready);
    assert!(ping(&hub).await);

    agent.set_visible(false);
    let hidden = next_event(&mut runtime_rx).await;
    assert!(matches!(
        hidden.event,
        RuntimeEvent::VisibilityChanged { visible: false }
    ));
    assert!(!ping(&hub).await);
}

#[tokio::test]
async fn unanswered_identity_fails_initialization() {
    relay_logging::initialize_for_tests();
    let (hub, mut runtime_rx) = LocalHub::new(Duration::from_secs(1));
    let mut agent = spawn_agent(hub.link(TAB), Arc::new(NoopPresenter), identity(), true);

    let mut queries = 0;
    let reason = loop {
        match next_event(&mut runtime_rx).await.event {
            // Dropping the reply channel is an immediate "no answer".
            RuntimeEvent::IdentityQuery { .. } => queries += 1,
            RuntimeEvent::InitFailed { reason } => break reason,
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert_eq!(queries, 3);
    assert_eq!(reason, "identity unavailable after 3 attempts");
    assert_eq!(agent.settled().await, AgentPhase::Failed);
    assert!(!ping(&hub).await);
}

#[tokio::test]
async fn unaddressable_runtime_fails_immediately() {
    relay_logging::initialize_for_tests();
    let (hub, runtime_rx) = LocalHub::new(Duration::from_secs(1));
    drop(runtime_rx);
    let mut agent = spawn_agent(hub.link(TAB), Arc::new(NoopPresenter), identity(), true);

    assert_eq!(agent.settled().await, AgentPhase::Failed);
    let reply = hub
        .send(
            TAB,
            Command::ShowPreview {
                message_id: 1,
                image_ref: "img".to_string(),
            },
        )
        .await
        .expect("agent still answers");
    assert_eq!(
        reply,
        Reply::Rejected {
            message_id: Some(1),
            reason: "receiver not initialized".to_string(),
        }
    );
}

#[tokio::test]
async fn unloaded_agent_stops_listening() {
    relay_logging::initialize_for_tests();
    let (hub, mut runtime_rx) = LocalHub::new(Duration::from_secs(1));
    let agent = spawn_agent(hub.link(TAB), Arc::new(NoopPresenter), identity(), true);
    assert!(hub.is_listening(TAB));

    agent.unload();
    loop {
        if let RuntimeEvent::Unloaded = next_event(&mut runtime_rx).await.event {
            break;
        }
    }
    agent.join().await;

    assert!(!hub.is_listening(TAB));
    assert!(hub.send(TAB, Command::Ping { timestamp: 2 }).await.is_err());
}

#[tokio::test]
async fn reinjected_agent_reports_under_a_new_instance() {
    let (hub, mut runtime_rx) = LocalHub::new(Duration::from_secs(1));
    let first = hub.link(TAB);
    let second = hub.link(TAB);
    assert!(second.instance() > first.instance());

    first.report(RuntimeEvent::Unloaded).expect("runtime open");
    let envelope = next_event(&mut runtime_rx).await;
    assert_eq!(envelope.sender, TAB);
    assert_eq!(envelope.instance, first.instance());
}
