//! # duet-store
//!
//! Local persistence for the duet client, backed by SQLite.
//!
//! A room's message list is stored as one JSON document keyed by the room
//! id, which is all the chat core needs: load the list when a conversation
//! opens, write it back after every change. Known users and the records of
//! files fetched or sent from this device live in their own tables.

pub mod blobs;
pub mod database;
pub mod migrations;
pub mod models;
pub mod rooms;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
