//! Signed-in session: identity, selected recipient and the feeds that belong
//! to them. Created by `sign_in`, torn down by `sign_out`.

use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::adapters::{MessageAdapter, UserAdapter};
use crate::api::auth::{AuthError, AuthProvider, Identity};
use crate::api::models::{Message, UserPresence};
use crate::api::query::Query;
use crate::api::store::{RealtimeStore, StoreError};
use crate::api::tree;
use crate::app::AppConfig;
use crate::feed::{Feed, FeedError, Subscription};
use crate::reconciler::{Clock, Reconciler};
use crate::ui::Surface;
use crate::utils::presence_key;

pub const MESSAGES_PATH: &str = "messages";
pub const USERS_PATH: &str = "users";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no recipient selected; pick one with /to <uid>")]
    NoRecipient,
    #[error("message text is empty")]
    EmptyMessage,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub message_limit: usize,
    pub user_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            message_limit: 5,
            user_limit: 5,
        }
    }
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            message_limit: config.message_limit.max(1),
            user_limit: config.user_limit.max(1),
        }
    }
}

pub struct Session {
    store: Arc<dyn RealtimeStore>,
    identity: Identity,
    settings: SessionSettings,
    recipient: Option<String>,
    users: Option<Subscription>,
    messages: Option<Subscription>,
}

impl Session {
    /// Signs in and announces presence.
    pub async fn sign_in(
        auth: &dyn AuthProvider,
        store: Arc<dyn RealtimeStore>,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let credentials = auth.sign_in().await?;
        store.authorize(credentials.token);
        let identity = credentials.identity;

        store
            .write(&Self::presence_path(&identity), &UserPresence::online(&identity))
            .await?;
        info!("[session] {} is online", identity.display_name);

        Ok(Self {
            store,
            identity,
            settings,
            recipient: None,
            users: None,
            messages: None,
        })
    }

    fn presence_path(identity: &Identity) -> String {
        tree::join(USERS_PATH, &presence_key(&identity.display_name))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn user_query(&self) -> Query {
        Query::new(USERS_PATH)
            .order_by_child("online")
            .equal_to(true)
            .limit_to_last(self.settings.user_limit)
    }

    pub fn message_query(&self) -> Query {
        Query::new(MESSAGES_PATH)
            .order_by_child("timestamp")
            .limit_to_last(self.settings.message_limit)
    }

    /// Starts (or restarts) the online-user list.
    pub async fn watch_users<S: Surface>(&mut self, surface: S) -> Result<(), SessionError> {
        let adapter = UserAdapter::new(&self.identity.uid);
        let feed = Feed::new(self.store.clone(), self.user_query(), adapter);
        self.users = Some(feed.subscribe(surface).await?);
        Ok(())
    }

    /// Switches the conversation; the previous message feed is cancelled and
    /// the new one starts from an empty list.
    pub async fn select_recipient<S: Surface>(
        &mut self,
        uid: &str,
        surface: S,
    ) -> Result<(), SessionError> {
        self.select_recipient_with(uid, Reconciler::new(), surface).await
    }

    /// As `select_recipient`, starting from a pre-seeded list.
    pub async fn select_recipient_with<C, S>(
        &mut self,
        uid: &str,
        reconciler: Reconciler<C>,
        surface: S,
    ) -> Result<(), SessionError>
    where
        C: Clock + 'static,
        S: Surface,
    {
        if let Some(mut previous) = self.messages.take() {
            previous.cancel();
        }
        self.recipient = Some(uid.to_string());
        let adapter = MessageAdapter::new(&self.identity.uid, uid);
        let feed = Feed::new(self.store.clone(), self.message_query(), adapter)
            .with_reconciler(reconciler);
        self.messages = Some(feed.subscribe(surface).await?);
        info!("[session] chatting with {uid}");
        Ok(())
    }

    /// Appends a message for the current recipient and marks it sent once
    /// the store has accepted it. Returns the generated message id.
    pub async fn send_message(&self, text: &str) -> Result<String, SessionError> {
        let recipient = self.recipient.as_deref().ok_or(SessionError::NoRecipient)?;
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let body = Message::outgoing(&self.identity, recipient, text);
        let id = self.store.append(MESSAGES_PATH, &body).await?;
        self.store
            .update(&tree::join(MESSAGES_PATH, &id), &json!({"sent": true}))
            .await?;
        Ok(id)
    }

    /// Cancels feeds, marks the user offline and signs out.
    pub async fn sign_out(mut self, auth: &dyn AuthProvider) -> Result<(), SessionError> {
        for mut sub in [self.messages.take(), self.users.take()].into_iter().flatten() {
            sub.cancel();
        }
        let presence = Self::presence_path(&self.identity);
        if let Err(e) = self.store.update(&presence, &json!({"online": false})).await {
            warn!("[session] could not clear presence: {e}");
        }
        auth.sign_out().await?;
        self.store.authorize(None);
        info!("[session] {} signed out", self.identity.display_name);
        Ok(())
    }
}
