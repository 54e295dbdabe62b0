//! # keychat-store
//!
//! Local SQLite persistence for contacts, personas, conversations and chat
//! messages. The crate exposes a `Database` handle wrapping a
//! `rusqlite::Connection` behind a mutex, typed CRUD helpers for each model,
//! and the [`ChatRepository`] trait the delivery and pairing engines are
//! written against.

pub mod chats;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod personas;
pub mod repository;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use repository::ChatRepository;
