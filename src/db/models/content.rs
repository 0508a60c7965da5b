//! User-generated content records.
//!
//! These collections matter to the scheduling core only as cascade-deletion
//! dependents; their feature endpoints are served elsewhere.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A message exchanged during a live counseling session
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LiveChatMessage {
    pub id: String,
    pub appointment_id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ForumPost {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ForumComment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalEntry {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

/// An AI chat record. The transcript is opaque to the core.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub transcript: String,
    pub created_at: String,
    pub updated_at: String,
}
