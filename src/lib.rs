//! A minimal real-time chat client.
//!
//! Messages and online users come from standing queries against a hosted
//! real-time database. Each delivery is a full result set; [`feed`] replays it
//! through an ordered [`reconciler`] so the rendered lists only ever see
//! inserts at the right position and in-place updates.

pub mod adapters;
pub mod api;
pub mod app;
pub mod feed;
pub mod reconciler;
pub mod session;
pub mod storage;
pub mod ui;
pub mod utils;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] app::ConfigError),
    #[error(transparent)]
    Auth(#[from] api::auth::AuthError),
    #[error(transparent)]
    Store(#[from] api::store::StoreError),
    #[error(transparent)]
    Cache(#[from] storage::CacheError),
    #[error(transparent)]
    Session(#[from] session::SessionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
