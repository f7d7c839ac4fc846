use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ember_db::Database;
use ember_types::models::NotificationPayload;

use crate::best_effort::BestEffort;
use crate::push::{PushStatus, PushTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The recipient switched this category off; nothing was written.
    Suppressed,
    Stored {
        notification_id: Uuid,
        pushed: usize,
        pruned: usize,
    },
    /// Reported to the failure observer.
    Failed,
}

/// Writes in-app notifications and pushes them to the recipient's browsers.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    db: Arc<Database>,
    push: Arc<dyn PushTransport>,
    best_effort: BestEffort,
}

impl Notifier {
    pub fn new(db: Arc<Database>, push: Arc<dyn PushTransport>, best_effort: BestEffort) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                db,
                push,
                best_effort,
            }),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.inner.db
    }

    pub fn best_effort(&self) -> &BestEffort {
        &self.inner.best_effort
    }

    /// Notify one user. Never fails: errors go to the failure observer.
    pub async fn dispatch(&self, recipient: Uuid, payload: NotificationPayload) -> DispatchOutcome {
        let context = format!("{} notification to {}", payload.category, recipient);
        match self.try_dispatch(recipient, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.best_effort.report(&context, &e);
                DispatchOutcome::Failed
            }
        }
    }

    /// Same as [`dispatch`](Self::dispatch) without waiting for the outcome.
    pub fn dispatch_in_background(&self, recipient: Uuid, payload: NotificationPayload) -> JoinHandle<()> {
        let this = self.clone();
        let context = format!("{} notification to {}", payload.category, recipient);
        self.inner.best_effort.spawn(context, async move {
            this.try_dispatch(recipient, payload).await.map(|_| ())
        })
    }

    /// The fallible core. Preference read and notification insert are two
    /// independent statements, not one transaction.
    pub async fn try_dispatch(&self, recipient: Uuid, payload: NotificationPayload) -> Result<DispatchOutcome> {
        let db = &self.inner.db;

        // Missing row means defaults; only explicit preference reads materialize it
        let prefs = db
            .run_blocking(move |db| db.get_preferences(recipient))
            .await?
            .unwrap_or_default();

        if !prefs.allows(payload.category) {
            debug!("{} disabled {} notifications, skipping", recipient, payload.category);
            return Ok(DispatchOutcome::Suppressed);
        }

        let notification_id = Uuid::new_v4();
        let stored = payload.clone();
        db.run_blocking(move |db| db.insert_notification(notification_id, recipient, &stored))
            .await?;

        let (pushed, pruned) = if prefs.push_enabled {
            self.push_all(recipient, notification_id, &payload).await
        } else {
            (0, 0)
        };

        Ok(DispatchOutcome::Stored {
            notification_id,
            pushed,
            pruned,
        })
    }

    /// Deliver to every subscription concurrently. Returns (pushed, pruned).
    async fn push_all(&self, recipient: Uuid, notification_id: Uuid, payload: &NotificationPayload) -> (usize, usize) {
        let db = &self.inner.db;
        let best_effort = &self.inner.best_effort;

        let subscriptions = match best_effort
            .run(
                "loading push subscriptions",
                db.run_blocking(move |db| db.push_subscriptions_for(recipient)),
            )
            .await
        {
            Some(subs) if !subs.is_empty() => subs,
            _ => return (0, 0),
        };

        let body = serde_json::json!({
            "title": payload.title,
            "body": payload.body,
            "url": payload.link_url,
            "category": payload.category,
            "notificationId": notification_id,
        });

        let push = &self.inner.push;
        let statuses = join_all(subscriptions.iter().map(|sub| push.deliver(sub, &body))).await;

        let mut pushed = 0;
        let mut pruned = 0;
        for (sub, status) in subscriptions.into_iter().zip(statuses) {
            match status {
                PushStatus::Delivered => pushed += 1,
                PushStatus::Gone => {
                    info!("Push endpoint gone, removing subscription {}", sub.id);
                    let id = sub.id;
                    let removed = best_effort
                        .run(
                            "pruning push subscription",
                            db.run_blocking(move |db| db.delete_push_subscription(id)),
                        )
                        .await;
                    if removed == Some(true) {
                        pruned += 1;
                    }
                }
                PushStatus::Failed(reason) => {
                    warn!("Push to {} failed: {}", sub.endpoint, reason);
                }
            }
        }

        (pushed, pruned)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ember_db::models::PushSubscriptionRow;
    use ember_types::models::{NotificationCategory, NotificationPreferences};

    use crate::best_effort::tests::RecordingObserver;

    /// Endpoints containing "gone" report 410, "down" fail softly, the rest succeed.
    #[derive(Default)]
    pub struct FakePush {
        pub delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushTransport for FakePush {
        async fn deliver(&self, subscription: &PushSubscriptionRow, _payload: &serde_json::Value) -> PushStatus {
            if subscription.endpoint.contains("gone") {
                PushStatus::Gone
            } else if subscription.endpoint.contains("down") {
                PushStatus::Failed("503".into())
            } else {
                self.delivered.lock().unwrap().push(subscription.endpoint.clone());
                PushStatus::Delivered
            }
        }
    }

    pub struct Harness {
        pub db: Arc<Database>,
        pub notifier: Notifier,
        pub push: Arc<FakePush>,
        pub observer: Arc<RecordingObserver>,
    }

    impl Harness {
        pub fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let push = Arc::new(FakePush::default());
            let observer = Arc::new(RecordingObserver::default());
            let notifier = Notifier::new(db.clone(), push.clone(), BestEffort::new(observer.clone()));
            Self {
                db,
                notifier,
                push,
                observer,
            }
        }

        pub fn user(&self, username: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.db.create_user(id, username, "hash", None).unwrap();
            id
        }
    }

    fn follower_payload() -> NotificationPayload {
        NotificationPayload::new(NotificationCategory::NewFollower, "New follower", "bob followed you")
            .with_link("/users/bob")
    }

    #[tokio::test]
    async fn missing_preferences_mean_all_on_push_off() {
        let h = Harness::new();
        let alice = h.user("alice");
        h.db.upsert_push_subscription(Uuid::new_v4(), alice, "https://push/a", "k", "a").unwrap();

        let outcome = h.notifier.dispatch(alice, follower_payload()).await;

        assert!(matches!(outcome, DispatchOutcome::Stored { pushed: 0, pruned: 0, .. }));
        assert_eq!(h.db.count_notifications(alice).unwrap(), 1);
        assert!(h.push.delivered.lock().unwrap().is_empty());
        // dispatch must not materialize the preference row
        assert!(h.db.get_preferences(alice).unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_category_has_no_side_effects() {
        let h = Harness::new();
        let alice = h.user("alice");
        let prefs = NotificationPreferences {
            new_follower: false,
            push_enabled: true,
            ..Default::default()
        };
        h.db.save_preferences(alice, &prefs).unwrap();
        h.db.upsert_push_subscription(Uuid::new_v4(), alice, "https://push/a", "k", "a").unwrap();

        let outcome = h.notifier.dispatch(alice, follower_payload()).await;

        assert_eq!(outcome, DispatchOutcome::Suppressed);
        assert_eq!(h.db.count_notifications(alice).unwrap(), 0);
        assert!(h.push.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gone_endpoints_are_pruned_and_others_still_delivered() {
        let h = Harness::new();
        let alice = h.user("alice");
        let prefs = NotificationPreferences {
            push_enabled: true,
            ..Default::default()
        };
        h.db.save_preferences(alice, &prefs).unwrap();
        h.db.upsert_push_subscription(Uuid::new_v4(), alice, "https://push/laptop", "k", "a").unwrap();
        h.db.upsert_push_subscription(Uuid::new_v4(), alice, "https://push/gone-phone", "k", "a").unwrap();
        h.db.upsert_push_subscription(Uuid::new_v4(), alice, "https://push/down-tablet", "k", "a").unwrap();

        let outcome = h.notifier.dispatch(alice, follower_payload()).await;

        assert!(matches!(outcome, DispatchOutcome::Stored { pushed: 1, pruned: 1, .. }));
        let remaining: Vec<String> = h
            .db
            .push_subscriptions_for(alice)
            .unwrap()
            .into_iter()
            .map(|s| s.endpoint)
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.iter().any(|e| e.contains("gone")));
        assert!(h.observer.contexts().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_is_observed_not_raised() {
        let h = Harness::new();
        // Unknown user violates the notifications foreign key
        let ghost = Uuid::new_v4();

        let outcome = h.notifier.dispatch(ghost, follower_payload()).await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(h.observer.contexts().len(), 1);
        assert!(h.observer.contexts()[0].starts_with("NEW_FOLLOWER notification"));
    }

    #[tokio::test]
    async fn background_dispatch_completes() {
        let h = Harness::new();
        let alice = h.user("alice");

        h.notifier
            .dispatch_in_background(alice, follower_payload())
            .await
            .unwrap();

        assert_eq!(h.db.count_notifications(alice).unwrap(), 1);
    }
}
