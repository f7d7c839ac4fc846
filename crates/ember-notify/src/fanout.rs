use uuid::Uuid;

use ember_types::models::NotificationPayload;

use crate::best_effort::FanOutReport;
use crate::dispatcher::Notifier;
use crate::mentions::extract_mentions;

impl Notifier {
    /// Dispatch the same payload to each recipient concurrently. One
    /// recipient's failure is reported and never reaches the others.
    pub async fn notify_users(&self, recipients: Vec<Uuid>, payload: NotificationPayload) -> FanOutReport {
        let context = format!("{} notification", payload.category);
        self.best_effort()
            .fan_out(&context, recipients, |recipient| {
                let payload = payload.clone();
                async move { self.try_dispatch(recipient, payload).await.map(|_| ()) }
            })
            .await
    }

    pub async fn notify_club_members(
        &self,
        club_id: Uuid,
        exclude: Uuid,
        payload: NotificationPayload,
    ) -> FanOutReport {
        let members = self
            .best_effort()
            .run(
                "loading club members",
                self.db().run_blocking(move |db| db.club_member_ids(club_id)),
            )
            .await;

        match members {
            Some(ids) => {
                let recipients = ids.into_iter().filter(|id| *id != exclude).collect();
                self.notify_users(recipients, payload).await
            }
            None => FanOutReport::default(),
        }
    }

    pub async fn notify_followers(&self, user_id: Uuid, payload: NotificationPayload) -> FanOutReport {
        let followers = self
            .best_effort()
            .run(
                "loading followers",
                self.db().run_blocking(move |db| db.follower_ids(user_id)),
            )
            .await;

        match followers {
            Some(ids) => self.notify_users(ids, payload).await,
            None => FanOutReport::default(),
        }
    }

    /// Notify every existing user mentioned in `text`, except the author.
    /// Unknown usernames are skipped.
    /// Notifies every known user mentioned in `text` except the author. With
    /// `members_of` set, only members of that club are notified.
    pub async fn notify_mentions(
        &self,
        author_id: Uuid,
        text: &str,
        members_of: Option<Uuid>,
        payload: NotificationPayload,
    ) -> FanOutReport {
        let usernames = extract_mentions(text);
        if usernames.is_empty() {
            return FanOutReport::default();
        }

        let recipients = self
            .best_effort()
            .run(
                "resolving mentions",
                self.db().run_blocking(move |db| {
                    let users = db.get_users_by_usernames(&usernames)?;
                    let members = match members_of {
                        Some(club_id) => Some(db.club_member_ids(club_id)?),
                        None => None,
                    };
                    Ok(users
                        .into_iter()
                        .map(|u| u.id)
                        .filter(|id| *id != author_id)
                        .filter(|id| members.as_ref().is_none_or(|m| m.contains(id)))
                        .collect::<Vec<_>>())
                }),
            )
            .await;

        match recipients {
            Some(recipients) => self.notify_users(recipients, payload).await,
            None => FanOutReport::default(),
        }
    }
}
