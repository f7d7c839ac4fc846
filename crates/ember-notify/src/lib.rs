//! Notification delivery for Ember: preference-gated dispatch, web-push
//! fan-out, @mention extraction and the event reminder sweep.

pub mod best_effort;
pub mod dispatcher;
pub mod fanout;
pub mod mentions;
pub mod push;
pub mod reminders;

pub use best_effort::{BestEffort, FailureObserver, FanOutReport, TracingObserver};
pub use dispatcher::{DispatchOutcome, Notifier};
pub use mentions::extract_mentions;
pub use push::{DisabledPushTransport, HttpPushTransport, PushStatus, PushTransport};
pub use reminders::{ReminderConfig, ReminderHandle, ReminderSweep, SweepReport};
