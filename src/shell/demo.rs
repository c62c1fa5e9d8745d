//! Demo walkthrough of the session lifecycle against the mock opener
//!
//! Runs entirely in-process: no real privilege escalation is attempted.
//! Useful for seeing the open handshake, FIFO dispatch, failure recovery,
//! and shutdown behavior without root access.

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use tokio::time::timeout;

use super::mock::{MockBehavior, MockOpener};
use super::types::OpenOptions;

use crate::session::{ActionChannel, EventListener, SessionEvent, SessionManager};

const DEMO_WAIT: Duration = Duration::from_secs(5);

/// Run the scripted demo and print each step
pub async fn run_demo() -> Result<()> {
    println!("{}", "privsh demo (mock shell, no real escalation)".bold());
    println!();

    // first open fails, every later one succeeds: shows recovery
    let opener = MockOpener::with_script(vec![MockBehavior::DeadOnProbe]);
    let session = SessionManager::with_opener(
        opener.clone(),
        OpenOptions {
            want_stderr: true,
            watchdog_timeout_seconds: 2,
            minimal_logging: false,
        },
    );
    let mut events = ActionChannel::new();

    println!("1. submitting while the opener is broken");
    session.run(
        vec!["echo hello".to_string()],
        1,
        EventListener::shared(1, events.event_tx()),
    );
    report(&mut events).await?;

    println!("2. retrying after the failure (fresh open)");
    session.run(
        vec!["echo hello".to_string()],
        2,
        EventListener::shared(2, events.event_tx()),
    );
    report(&mut events).await?;

    println!("3. two commands in quick succession run in order");
    session.run(
        vec!["echo first".to_string()],
        3,
        EventListener::shared(3, events.event_tx()),
    );
    session.run(
        vec!["false".to_string()],
        4,
        EventListener::shared(4, events.event_tx()),
    );
    report(&mut events).await?;
    report(&mut events).await?;

    session.shutdown();
    println!();
    println!(
        "opens attempted: {}, session stats: {:?}",
        opener.open_count(),
        session.stats()
    );

    Ok(())
}

async fn report(events: &mut ActionChannel) -> Result<()> {
    let event = timeout(DEMO_WAIT, events.next_event())
        .await
        .map_err(|_| anyhow::anyhow!("demo timed out waiting for a command outcome"))?;
    match event {
        Some(SessionEvent::CommandCompleted {
            code,
            exit_code,
            output,
        }) => {
            let status = if exit_code == 0 {
                format!("exit {}", exit_code).green()
            } else {
                format!("exit {}", exit_code).yellow()
            };
            println!("   command {}: {} {:?}", code, status, output);
        }
        Some(SessionEvent::CommandFailed { code }) => {
            println!("   command {}: {}", code, "failed (channel dead)".red());
        }
        Some(SessionEvent::Error { message }) => {
            println!("   error: {}", message.red());
        }
        None => anyhow::bail!("event channel closed unexpectedly"),
    }
    Ok(())
}
