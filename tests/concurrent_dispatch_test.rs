//! Concurrent dispatch tests for privsh

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;

use privsh::session::{ActionChannel, EventListener, SessionEvent, SessionManager};
use privsh::shell::{MockOpener, OpenOptions};

const WAIT: Duration = Duration::from_secs(10);

fn options() -> OpenOptions {
    OpenOptions {
        want_stderr: true,
        watchdog_timeout_seconds: 5,
        minimal_logging: true,
    }
}

async fn next(events: &mut ActionChannel) -> SessionEvent {
    timeout(WAIT, events.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_concurrent_runs_trigger_a_single_open() {
    let opener = MockOpener::healthy();
    let session = Arc::new(SessionManager::with_opener(opener.clone(), options()));
    let mut events = ActionChannel::new();

    let mut tasks = FuturesUnordered::new();
    for code in 1..=16 {
        let session = session.clone();
        let tx = events.event_tx();
        tasks.push(tokio::spawn(async move {
            session.run(
                vec![format!("echo out-{}", code)],
                code,
                EventListener::shared(code, tx),
            );
        }));
    }
    while tasks.next().await.is_some() {}

    let mut completed = HashSet::new();
    for _ in 0..16 {
        match next(&mut events).await {
            SessionEvent::CommandCompleted { code, exit_code, .. } => {
                assert_eq!(exit_code, 0);
                completed.insert(code);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    assert_eq!(completed.len(), 16);
    assert_eq!(opener.open_count(), 1, "racing submitters must share one open");
}

#[tokio::test]
async fn test_fifo_order_on_a_ready_session() {
    let session = SessionManager::with_opener(MockOpener::healthy(), options());
    let mut events = ActionChannel::new();

    // warm the session up to Ready
    session.run(
        vec!["echo warmup".to_string()],
        0,
        EventListener::shared(0, events.event_tx()),
    );
    assert!(matches!(
        next(&mut events).await,
        SessionEvent::CommandCompleted { code: 0, .. }
    ));

    for code in 1..=8 {
        session.run(
            vec![format!("echo step-{}", code)],
            code,
            EventListener::shared(code, events.event_tx()),
        );
    }

    for expected in 1..=8 {
        match next(&mut events).await {
            SessionEvent::CommandCompleted { code, output, .. } => {
                assert_eq!(code, expected, "listeners must fire in submission order");
                assert_eq!(output, vec![format!("step-{}", expected)]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_submissions_during_open_are_queued_in_order() {
    let opener = MockOpener::healthy();
    let session = SessionManager::with_opener(opener.clone(), options());
    let mut events = ActionChannel::new();

    // both submitted while the open handshake is still in flight
    session.run(
        vec!["echo first".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );
    session.run(
        vec!["echo second".to_string()],
        2,
        EventListener::shared(2, events.event_tx()),
    );

    assert!(matches!(
        next(&mut events).await,
        SessionEvent::CommandCompleted { code: 1, .. }
    ));
    assert!(matches!(
        next(&mut events).await,
        SessionEvent::CommandCompleted { code: 2, .. }
    ));
    assert_eq!(opener.open_count(), 1);
}
