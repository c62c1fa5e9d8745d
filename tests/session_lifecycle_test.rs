//! Session lifecycle tests for privsh

use std::time::Duration;

use tokio::time::timeout;

use privsh::session::{ActionChannel, EventListener, SessionEvent, SessionManager, SessionState};
use privsh::shell::{MockBehavior, MockOpener, OpenOptions};

const WAIT: Duration = Duration::from_secs(5);

fn options(watchdog: u64) -> OpenOptions {
    OpenOptions {
        want_stderr: true,
        watchdog_timeout_seconds: watchdog,
        minimal_logging: false,
    }
}

async fn next(events: &mut ActionChannel) -> SessionEvent {
    timeout(WAIT, events.next_event())
        .await
        .expect("timed out waiting for a session event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_command_completes_with_output() {
    let session = SessionManager::with_opener(MockOpener::healthy(), options(5));
    let mut events = ActionChannel::new();

    session.run(
        vec!["echo ok".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );

    assert_eq!(
        next(&mut events).await,
        SessionEvent::CommandCompleted {
            code: 1,
            exit_code: 0,
            output: vec!["ok".to_string()],
        }
    );
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn test_open_failure_reports_once_and_allows_retry() {
    let opener = MockOpener::with_script(vec![MockBehavior::DeadOnProbe]);
    let session = SessionManager::with_opener(opener.clone(), options(5));
    let mut events = ActionChannel::new();

    session.run(
        vec!["echo first".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );

    assert_eq!(next(&mut events).await, SessionEvent::CommandFailed { code: 1 });
    // the slot is reconciled before the failure is delivered
    assert_eq!(session.state(), SessionState::Absent);

    // retrying transparently opens a fresh channel
    session.run(
        vec!["echo second".to_string()],
        2,
        EventListener::shared(2, events.event_tx()),
    );
    assert_eq!(
        next(&mut events).await,
        SessionEvent::CommandCompleted {
            code: 2,
            exit_code: 0,
            output: vec!["second".to_string()],
        }
    );
    assert_eq!(opener.open_count(), 2);
}

#[tokio::test]
async fn test_spawn_error_reports_failure() {
    let opener = MockOpener::with_behavior(MockBehavior::SpawnError);
    let session = SessionManager::with_opener(opener, options(5));
    let mut events = ActionChannel::new();

    session.run(
        vec!["echo nope".to_string()],
        7,
        EventListener::shared(7, events.event_tx()),
    );

    assert_eq!(next(&mut events).await, SessionEvent::CommandFailed { code: 7 });
    assert_eq!(session.state(), SessionState::Absent);
}

#[tokio::test]
async fn test_shutdown_then_reopen() {
    let opener = MockOpener::healthy();
    let session = SessionManager::with_opener(opener.clone(), options(5));
    let mut events = ActionChannel::new();

    session.run(
        vec!["echo before".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );
    assert!(matches!(
        next(&mut events).await,
        SessionEvent::CommandCompleted { code: 1, .. }
    ));

    session.shutdown();
    assert_eq!(session.state(), SessionState::Absent);

    // a later submission must not reuse the killed channel
    session.run(
        vec!["echo after".to_string()],
        2,
        EventListener::shared(2, events.event_tx()),
    );
    assert_eq!(
        next(&mut events).await,
        SessionEvent::CommandCompleted {
            code: 2,
            exit_code: 0,
            output: vec!["after".to_string()],
        }
    );
    assert_eq!(opener.open_count(), 2);
}

#[tokio::test]
async fn test_watchdog_trip_fails_all_pending_then_recovers() {
    let opener = MockOpener::healthy();
    let session = SessionManager::with_opener(opener.clone(), options(1));
    let mut events = ActionChannel::new();

    // A hangs mid-execution, B waits in the FIFO behind it
    session.run(
        vec!["hang".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );
    session.run(
        vec!["echo queued".to_string()],
        2,
        EventListener::shared(2, events.event_tx()),
    );

    assert_eq!(next(&mut events).await, SessionEvent::CommandFailed { code: 1 });
    assert_eq!(next(&mut events).await, SessionEvent::CommandFailed { code: 2 });
    assert_eq!(session.state(), SessionState::Absent);

    // the next submission opens a fresh channel
    session.run(
        vec!["echo recovered".to_string()],
        3,
        EventListener::shared(3, events.event_tx()),
    );
    assert_eq!(
        next(&mut events).await,
        SessionEvent::CommandCompleted {
            code: 3,
            exit_code: 0,
            output: vec!["recovered".to_string()],
        }
    );
    assert_eq!(opener.open_count(), 2);
}

#[tokio::test]
async fn test_nonzero_exit_code_is_reported_unchanged() {
    let session = SessionManager::with_opener(MockOpener::healthy(), options(5));
    let mut events = ActionChannel::new();

    session.run(
        vec!["false".to_string()],
        11,
        EventListener::shared(11, events.event_tx()),
    );

    assert_eq!(
        next(&mut events).await,
        SessionEvent::CommandCompleted {
            code: 11,
            exit_code: 1,
            output: vec![],
        }
    );
}
