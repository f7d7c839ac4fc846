use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::ChatMessageRow;
use ember_types::events::{ChatMessage, RelayCommand, RelayEvent};
use ember_types::models::{SessionStatus, UserSummary};

use crate::registry::{ConnectionId, Registry};

/// Messages replayed to a connection when it joins a room.
pub const HISTORY_LIMIT: u32 = 100;

/// Longest chat message accepted, in characters, after trimming.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Why a command was refused. The display text is what the client sees.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("Session not found")]
    SessionNotFound,
    #[error("Session has ended")]
    SessionEnded,
    #[error("Access denied")]
    AccessDenied,
    #[error("Join the session first")]
    NotJoined,
    #[error("Message cannot be empty")]
    EmptyMessage,
    #[error("Message is too long")]
    MessageTooLong,
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// The herf relay: room membership in [`Registry`], chat in the database.
#[derive(Clone)]
pub struct Relay {
    db: Arc<Database>,
    registry: Registry,
}

impl Relay {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            registry: Registry::new(),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn connect(&self, user: UserSummary) -> (ConnectionId, mpsc::UnboundedReceiver<RelayEvent>) {
        self.registry.register(user).await
    }

    /// Leave every room and tell the remaining members.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let (user, sessions) = self.registry.unregister(conn_id).await;
        let Some(user) = user else {
            return;
        };

        for session_id in sessions {
            self.registry
                .broadcast(
                    session_id,
                    RelayEvent::UserLeft {
                        user: user.clone(),
                        timestamp: Utc::now(),
                    },
                    None,
                )
                .await;
        }
    }

    /// Apply one command. A rejection is sent back as an `error` event.
    pub async fn handle(&self, conn_id: ConnectionId, user: &UserSummary, cmd: RelayCommand) {
        if let Err(rejection) = self.try_handle(conn_id, user, cmd).await {
            if let Rejection::Internal(e) = &rejection {
                error!("Relay command from {} failed: {:#}", user.username, e);
            } else {
                debug!("Rejected command from {}: {}", user.username, rejection);
            }
            self.registry
                .send_to(conn_id, RelayEvent::error(rejection.to_string()))
                .await;
        }
    }

    pub async fn try_handle(&self, conn_id: ConnectionId, user: &UserSummary, cmd: RelayCommand) -> Result<(), Rejection> {
        match cmd {
            RelayCommand::JoinSession { session_id } => self.join(conn_id, user, session_id).await,

            RelayCommand::LeaveSession { session_id } => {
                if self.registry.leave(session_id, conn_id).await {
                    info!("{} left herf {}", user.username, session_id);
                    self.registry
                        .broadcast(
                            session_id,
                            RelayEvent::UserLeft {
                                user: user.clone(),
                                timestamp: Utc::now(),
                            },
                            None,
                        )
                        .await;
                }
                Ok(())
            }

            RelayCommand::ChatMessage { session_id, message } => {
                self.chat(conn_id, user, session_id, &message).await
            }

            RelayCommand::Typing { session_id } => {
                let event = RelayEvent::UserTyping {
                    user_id: user.id,
                    username: user.username.clone(),
                };
                self.signal(conn_id, session_id, event).await;
                Ok(())
            }

            RelayCommand::StopTyping { session_id } => {
                let event = RelayEvent::UserStopTyping {
                    user_id: user.id,
                    username: user.username.clone(),
                };
                self.signal(conn_id, session_id, event).await;
                Ok(())
            }
        }
    }

    async fn join(&self, conn_id: ConnectionId, user: &UserSummary, session_id: Uuid) -> Result<(), Rejection> {
        let session = self
            .db
            .run_blocking(move |db| db.get_session(session_id))
            .await?
            .ok_or(Rejection::SessionNotFound)?;

        if session.status == SessionStatus::Ended {
            return Err(Rejection::SessionEnded);
        }
        let user_id = user.id;
        if !self
            .db
            .run_blocking(move |db| db.may_enter_session(session_id, user_id))
            .await?
        {
            return Err(Rejection::AccessDenied);
        }

        if self.registry.join(session_id, conn_id).await {
            info!("{} joined herf {}", user.username, session_id);
            self.registry
                .broadcast(
                    session_id,
                    RelayEvent::UserJoined {
                        user: user.clone(),
                        timestamp: Utc::now(),
                    },
                    Some(conn_id),
                )
                .await;
        }

        let history = self
            .db
            .run_blocking(move |db| db.recent_chat_messages(session_id, HISTORY_LIMIT))
            .await?;
        let messages = history.into_iter().map(chat_message).collect();
        self.registry
            .send_to(conn_id, RelayEvent::ChatHistory { messages })
            .await;

        Ok(())
    }

    async fn chat(&self, conn_id: ConnectionId, user: &UserSummary, session_id: Uuid, message: &str) -> Result<(), Rejection> {
        if !self.registry.is_member(session_id, conn_id).await {
            return Err(Rejection::NotJoined);
        }

        let content = message.trim().to_string();
        if content.is_empty() {
            return Err(Rejection::EmptyMessage);
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(Rejection::MessageTooLong);
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let stored = content.clone();
        let user_id = user.id;
        self.db
            .run_blocking(move |db| db.insert_chat_message(id, session_id, user_id, &stored, created_at))
            .await?;

        let message = ChatMessage {
            id,
            session_id,
            user_id,
            content,
            created_at,
            user: user.clone(),
        };
        self.registry
            .broadcast(session_id, RelayEvent::NewMessage { message }, None)
            .await;
        Ok(())
    }

    /// Typing indicators: room members only, never echoed, never stored.
    async fn signal(&self, conn_id: ConnectionId, session_id: Uuid, event: RelayEvent) {
        if self.registry.is_member(session_id, conn_id).await {
            self.registry.broadcast(session_id, event, Some(conn_id)).await;
        }
    }
}

fn chat_message(row: ChatMessageRow) -> ChatMessage {
    ChatMessage {
        id: row.id,
        session_id: row.session_id,
        user_id: row.user.id,
        content: row.content,
        created_at: row.created_at,
        user: row.user,
    }
}
