use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use uuid::Uuid;

use ember_db::Database;
use ember_types::models::{NotificationCategory, NotificationPayload, ReminderWindow};

use crate::dispatcher::{DispatchOutcome, Notifier};

#[derive(Debug, Clone, Copy)]
pub struct ReminderConfig {
    pub period: Duration,
    /// Half-width of each reminder window.
    pub tolerance: chrono::Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3600),
            tolerance: chrono::Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub events: usize,
    /// Reminders actually stored for their recipient.
    pub reminders: usize,
    /// Recipients who switched EVENT_REMINDER off.
    pub suppressed: usize,
    /// Attendees already reminded for this window by an earlier run.
    pub skipped: usize,
    pub failed: usize,
}

/// An event in a window, with the attendees whose reminder this run claimed.
struct DueEvent {
    id: Uuid,
    title: String,
    claimed: Vec<Uuid>,
    skipped: usize,
}

/// Periodic EVENT_REMINDER sweep over the 24h and 1h windows.
///
/// Each (event, attendee, window) is claimed in `event_reminders` before the
/// notification goes out, so overlapping or delayed runs never send the same
/// reminder twice. A dispatch that fails after the claim is not retried.
pub struct ReminderSweep {
    notifier: Notifier,
    config: ReminderConfig,
}

impl ReminderSweep {
    pub fn new(notifier: Notifier, config: ReminderConfig) -> Self {
        Self { notifier, config }
    }

    /// Half-open `[start, end)` ranges of event start times due for a reminder.
    pub fn windows(&self, now: DateTime<Utc>) -> [(ReminderWindow, DateTime<Utc>, DateTime<Utc>); 2] {
        let tol = self.config.tolerance;
        let day = now + chrono::Duration::hours(24);
        let hour = now + chrono::Duration::hours(1);
        [
            (ReminderWindow::DayBefore, day - tol, day + tol),
            (ReminderWindow::HourBefore, hour - tol, hour + tol),
        ]
    }

    /// One sweep. Never fails; problems are reported and counted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for (window, from, to) in self.windows(now) {
            let due = self
                .notifier
                .best_effort()
                .run(
                    &format!("reminder sweep ({})", window),
                    self.notifier
                        .db()
                        .run_blocking(move |db| claim_due(db, window, from, to)),
                )
                .await;

            let Some(due) = due else {
                report.failed += 1;
                continue;
            };

            for event in due {
                report.events += 1;
                report.skipped += event.skipped;
                if event.claimed.is_empty() {
                    continue;
                }

                let payload = reminder_payload(event.id, &event.title, window);
                let outcomes = join_all(
                    event
                        .claimed
                        .into_iter()
                        .map(|attendee| self.notifier.dispatch(attendee, payload.clone())),
                )
                .await;
                for outcome in outcomes {
                    match outcome {
                        DispatchOutcome::Stored { .. } => report.reminders += 1,
                        DispatchOutcome::Suppressed => report.suppressed += 1,
                        DispatchOutcome::Failed => report.failed += 1,
                    }
                }
            }
        }

        if report.events > 0 {
            info!(
                "Reminder sweep: {} events, {} reminders sent, {} muted, {} already sent",
                report.events, report.reminders, report.suppressed, report.skipped
            );
        }
        report
    }

    /// Run immediately, then every `period` until the handle is stopped.
    pub fn start(self) -> ReminderHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sweep = Arc::new(self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep.config.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        // A panicking run ends only its own task
                        let run = sweep.clone();
                        if let Err(e) = tokio::spawn(async move { run.run_once(Utc::now()).await }).await {
                            error!("Reminder sweep aborted: {}", e);
                        }
                    }
                }
            }

            info!("Reminder sweep stopped");
        });

        ReminderHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

pub struct ReminderHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReminderHandle {
    /// Stop the timer and wait for an in-flight sweep to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!("Reminder task ended abnormally: {}", e);
        }
    }
}

fn claim_due(db: &Database, window: ReminderWindow, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DueEvent>> {
    let mut due = Vec::new();
    for event in db.events_starting_between(from, to)? {
        let mut claimed = Vec::new();
        let mut skipped = 0;
        for attendee in db.going_attendee_ids(event.id)? {
            if db.record_reminder(event.id, attendee, window)? {
                claimed.push(attendee);
            } else {
                skipped += 1;
            }
        }
        due.push(DueEvent {
            id: event.id,
            title: event.title,
            claimed,
            skipped,
        });
    }
    Ok(due)
}

fn reminder_payload(event_id: Uuid, title: &str, window: ReminderWindow) -> NotificationPayload {
    let when = match window {
        ReminderWindow::DayBefore => "tomorrow",
        ReminderWindow::HourBefore => "in one hour",
    };
    NotificationPayload::new(
        NotificationCategory::EventReminder,
        "Event reminder",
        format!("{} starts {}", title, when),
    )
    .with_link(format!("/events/{}", event_id))
}
