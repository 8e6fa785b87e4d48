use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::api::errors::ExamError;
use crate::api::session::WeakSession;
use crate::db::types::SubmitReason;

/// Spawns the countdown and heartbeat of a started session. Both stop when `shutdown` flips
/// or the session is dropped.
pub(crate) fn spawn_session_tasks(
    session: WeakSession,
    time_left: Duration,
    heartbeat_every: Duration,
    shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(countdown(session.clone(), time_left, shutdown.clone()));
    tokio::spawn(heartbeat_loop(session, heartbeat_every, shutdown));
}

async fn countdown(session: WeakSession, time_left: Duration, mut shutdown: watch::Receiver<bool>) {
    tokio::select! {
        _ = shutdown.changed() => {}
        _ = sleep(time_left) => {
            let Some(session) = session.upgrade() else {
                return;
            };
            tracing::info!(test_id = %session.test().id, "Time is up; submitting the exam");
            match session.finalize(SubmitReason::TimeExpired).await {
                Ok(_) | Err(ExamError::AlreadySubmitted) => {}
                Err(err) => tracing::error!(error = %err, "Timed submission failed"),
            }
        }
    }
}

async fn heartbeat_loop(
    session: WeakSession,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The record was just created; the first tick fires immediately.
    tick.tick().await;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let Some(session) = session.upgrade() else {
                    break;
                };
                session.heartbeat().await;
            }
        }
    }
}
