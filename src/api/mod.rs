pub mod auth;
pub mod client;
pub mod events;
pub mod memory;
pub mod models;
pub mod query;
pub mod store;
pub mod tree;
