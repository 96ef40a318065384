use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardrelay_core::{
    Command, MessageStatus, Payload, PreviewOutcome, ReceiverId, ReceiverLifecycle,
};
use cardrelay_engine::{
    DeliveryError, FailureReason, ReceiverRegistry, RetryPolicy, StatusChange, StatusSubscriber,
    StatusTracker,
};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

const TAB: ReceiverId = 3;
const OTHER_TAB: ReceiverId = 4;

#[derive(Default)]
struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<(&'static str, StatusChange)>>>,
}

impl Recorder {
    fn transitions(&self) -> Vec<(MessageStatus, MessageStatus)> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, change)| (change.from, change.to))
            .collect()
    }

    fn last(&self) -> StatusChange {
        self.log.lock().unwrap().last().unwrap().1.clone()
    }
}

impl StatusSubscriber for Recorder {
    fn on_status_change(&self, change: &StatusChange) {
        self.log.lock().unwrap().push((self.label, change.clone()));
    }
}

fn preview(image_ref: &str) -> Payload {
    Payload::ShowPreview {
        image_ref: image_ref.to_string(),
    }
}

fn setup() -> (StatusTracker, Arc<Recorder>) {
    let (tracker, recorder, _) = setup_with_registry();
    (tracker, recorder)
}

fn setup_with_registry() -> (StatusTracker, Arc<Recorder>, Arc<ReceiverRegistry>) {
    relay_logging::initialize_for_tests();
    let registry = Arc::new(ReceiverRegistry::new());
    for tab in [TAB, OTHER_TAB] {
        registry.resolve(tab, Some("https://example.com"));
        registry.mark_ready(tab, Some(true));
    }
    let tracker = StatusTracker::new(Arc::clone(&registry), RetryPolicy::new(3, Duration::ZERO));
    let recorder = Arc::new(Recorder {
        label: "recorder",
        ..Recorder::default()
    });
    tracker.subscribe(recorder.clone());
    (tracker, recorder, registry)
}

fn processing(tracker: &StatusTracker, receiver: ReceiverId) -> u64 {
    let (id, _) = tracker.register(receiver, preview("img"));
    assert!(tracker.record_ack(id));
    id
}

#[test]
fn register_builds_the_wire_command() {
    let (tracker, _) = setup();
    let (id, command) = tracker.register(TAB, preview("data:image/png;base64,AA"));

    assert_eq!(
        command,
        Command::ShowPreview {
            message_id: id,
            image_ref: "data:image/png;base64,AA".to_string(),
        }
    );
    assert_eq!(tracker.status(id), Some(MessageStatus::Pending));
}

#[test]
fn happy_path_walks_pending_processing_completed() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);
    tracker.record_outcome(TAB, id, PreviewOutcome::Shown);

    assert_eq!(tracker.status(id), Some(MessageStatus::Completed));
    assert_eq!(
        recorder.transitions(),
        vec![
            (MessageStatus::Pending, MessageStatus::Processing),
            (MessageStatus::Processing, MessageStatus::Completed),
        ]
    );
}

#[test]
fn outcome_is_recorded_once() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);
    tracker.record_outcome(TAB, id, PreviewOutcome::Shown);
    tracker.record_outcome(
        TAB,
        id,
        PreviewOutcome::Failed {
            error: "late".into(),
        },
    );

    assert_eq!(tracker.status(id), Some(MessageStatus::Completed));
    assert_eq!(recorder.transitions().len(), 2);
}

#[test]
fn failed_outcome_carries_the_receiver_error() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);
    tracker.record_outcome(
        TAB,
        id,
        PreviewOutcome::Failed {
            error: "image did not load".into(),
        },
    );

    assert_eq!(tracker.status(id), Some(MessageStatus::Failed));
    assert_eq!(
        recorder.last().delivery_error(),
        Some(DeliveryError::RejectedByReceiver(
            "image did not load".to_string()
        ))
    );
}

#[test]
fn outcome_before_ack_implies_the_ack() {
    let (tracker, recorder) = setup();
    let (id, _) = tracker.register(TAB, preview("img"));
    tracker.record_outcome(TAB, id, PreviewOutcome::Shown);

    assert_eq!(tracker.status(id), Some(MessageStatus::Completed));
    assert_eq!(
        recorder.transitions(),
        vec![
            (MessageStatus::Pending, MessageStatus::Processing),
            (MessageStatus::Processing, MessageStatus::Completed),
        ]
    );
    assert!(tracker.record_ack(id));
}

#[test]
fn ack_from_uninitialized_receiver_keeps_message_pending() {
    let (tracker, recorder) = setup();
    let (id, _) = tracker.register(99, preview("img"));

    assert!(!tracker.record_ack(id));
    assert_eq!(tracker.status(id), Some(MessageStatus::Pending));
    assert!(recorder.transitions().is_empty());
}

#[test]
fn unknown_message_outcome_is_ignored() {
    let (tracker, recorder) = setup();
    tracker.record_outcome(TAB, 4242, PreviewOutcome::Shown);

    assert_eq!(tracker.status(4242), None);
    assert!(!tracker.record_ack(4242));
    assert!(recorder.transitions().is_empty());
}

#[test]
fn outcome_from_foreign_receiver_is_ignored() {
    let (tracker, _) = setup();
    let id = processing(&tracker, TAB);
    tracker.record_outcome(OTHER_TAB, id, PreviewOutcome::Shown);

    assert_eq!(tracker.status(id), Some(MessageStatus::Processing));
}

#[test]
fn ids_are_unique_across_receivers_and_collection() {
    let (tracker, _) = setup();
    let first = processing(&tracker, TAB);
    let second = processing(&tracker, OTHER_TAB);
    tracker.fail(first, FailureReason::TornDown);
    let collected = tracker.collect_garbage(Instant::now() + Duration::from_secs(1), Duration::ZERO);
    let (third, _) = tracker.register(TAB, preview("img"));

    assert_eq!(collected, 1);
    assert!(first < second && second < third);
}

#[test]
fn hiding_interrupts_and_showing_resumes() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);
    let untouched = processing(&tracker, OTHER_TAB);

    assert!(tracker.on_receiver_visibility_changed(TAB, false).is_empty());
    assert_eq!(tracker.status(id), Some(MessageStatus::Interrupted));
    assert_eq!(tracker.status(untouched), Some(MessageStatus::Processing));

    // Repeated hidden signal changes nothing.
    let before = recorder.transitions().len();
    assert!(tracker.on_receiver_visibility_changed(TAB, false).is_empty());
    assert_eq!(recorder.transitions().len(), before);

    let resubmissions = tracker.on_receiver_visibility_changed(TAB, true);
    assert_eq!(resubmissions.len(), 1);
    assert_eq!(resubmissions[0].message_id, id);
    assert_eq!(resubmissions[0].command.message_id(), Some(id));
    assert_eq!(tracker.status(id), Some(MessageStatus::Processing));
    assert_eq!(tracker.get(id).unwrap().resume_count, 1);

    assert!(tracker.on_receiver_visibility_changed(TAB, true).is_empty());
}

#[test]
fn outcome_while_interrupted_completes_the_message() {
    let (tracker, _) = setup();
    let id = processing(&tracker, TAB);
    tracker.on_receiver_visibility_changed(TAB, false);
    tracker.record_outcome(TAB, id, PreviewOutcome::Shown);

    assert_eq!(tracker.status(id), Some(MessageStatus::Completed));
}

#[test]
fn resume_ceiling_abandons_the_message() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);

    for _ in 0..3 {
        tracker.on_receiver_visibility_changed(TAB, false);
        assert_eq!(tracker.on_receiver_visibility_changed(TAB, true).len(), 1);
    }
    tracker.on_receiver_visibility_changed(TAB, false);
    assert!(tracker.on_receiver_visibility_changed(TAB, true).is_empty());

    let message = tracker.get(id).unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.resume_count, 3);
    assert_eq!(message.last_error, Some(FailureReason::Abandoned));
    assert_eq!(
        recorder.last().delivery_error(),
        Some(DeliveryError::Abandoned(id))
    );
}

#[test]
fn pending_messages_are_not_interrupted() {
    let (tracker, _) = setup();
    let (id, _) = tracker.register(TAB, preview("img"));
    tracker.on_receiver_visibility_changed(TAB, false);

    assert_eq!(tracker.status(id), Some(MessageStatus::Pending));
}

#[test]
fn ack_after_hiding_interrupts_until_shown() {
    let (tracker, recorder, registry) = setup_with_registry();
    let (id, _) = tracker.register(TAB, preview("img"));
    registry.set_visibility(TAB, false);
    assert!(tracker.on_receiver_visibility_changed(TAB, false).is_empty());

    assert!(tracker.record_ack(id));
    assert_eq!(tracker.status(id), Some(MessageStatus::Interrupted));
    assert_eq!(
        recorder.transitions(),
        vec![
            (MessageStatus::Pending, MessageStatus::Processing),
            (MessageStatus::Processing, MessageStatus::Interrupted),
        ]
    );
    assert_eq!(registry.lifecycle(TAB), Some(ReceiverLifecycle::Hidden));

    registry.set_visibility(TAB, true);
    let resubmissions = tracker.on_receiver_visibility_changed(TAB, true);
    assert_eq!(resubmissions.len(), 1);
    assert_eq!(resubmissions[0].message_id, id);
    assert_eq!(tracker.status(id), Some(MessageStatus::Processing));
    assert!(tracker.on_receiver_visibility_changed(TAB, true).is_empty());
}

#[test]
fn fail_all_for_fails_only_outstanding_messages_of_that_receiver() {
    let (tracker, _) = setup();
    let done = processing(&tracker, TAB);
    tracker.record_outcome(TAB, done, PreviewOutcome::Shown);
    let (pending, _) = tracker.register(TAB, preview("img"));
    let interrupted = processing(&tracker, TAB);
    tracker.on_receiver_visibility_changed(TAB, false);
    let elsewhere = processing(&tracker, OTHER_TAB);

    tracker.fail_all_for(TAB, FailureReason::TornDown);

    assert_eq!(tracker.status(done), Some(MessageStatus::Completed));
    assert_eq!(tracker.status(pending), Some(MessageStatus::Failed));
    assert_eq!(tracker.status(interrupted), Some(MessageStatus::Failed));
    assert_eq!(tracker.status(elsewhere), Some(MessageStatus::Processing));
    assert!(tracker.outstanding_for(TAB).is_empty());
    assert_eq!(tracker.outstanding_for(OTHER_TAB), vec![elsewhere]);
}

#[test]
fn overdue_outcomes_time_out() {
    let (tracker, recorder) = setup();
    let id = processing(&tracker, TAB);
    let timeout = Duration::from_secs(30);

    assert_eq!(tracker.expire_overdue(Instant::now(), timeout), 0);
    assert_eq!(tracker.expire_overdue(Instant::now() + timeout, timeout), 1);
    assert_eq!(tracker.status(id), Some(MessageStatus::Failed));
    assert_eq!(recorder.last().reason, Some(FailureReason::OutcomeTimeout));
}

#[test]
fn garbage_collection_keeps_live_messages() {
    let (tracker, _) = setup();
    let live = processing(&tracker, TAB);
    let finished = processing(&tracker, TAB);
    tracker.record_outcome(TAB, finished, PreviewOutcome::Shown);
    let ttl = Duration::from_secs(300);

    assert_eq!(tracker.collect_garbage(Instant::now(), ttl), 0);
    assert_eq!(tracker.collect_garbage(Instant::now() + ttl, ttl), 1);
    assert_eq!(tracker.status(finished), None);
    assert_eq!(tracker.status(live), Some(MessageStatus::Processing));
}

#[test]
fn subscribers_see_changes_in_order_of_subscription() {
    let (tracker, _) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second"] {
        tracker.subscribe(Arc::new(Recorder {
            label,
            log: Arc::clone(&log),
        }));
    }

    let id = processing(&tracker, TAB);
    tracker.record_outcome(TAB, id, PreviewOutcome::Shown);

    let seen = log
        .lock()
        .unwrap()
        .iter()
        .map(|(label, change)| (*label, change.to))
        .collect::<Vec<_>>();
    assert_eq!(
        seen,
        vec![
            ("first", MessageStatus::Processing),
            ("second", MessageStatus::Processing),
            ("first", MessageStatus::Completed),
            ("second", MessageStatus::Completed),
        ]
    );
}
