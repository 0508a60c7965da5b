//! Cascade deletion across the dependent collections.
//!
//! The schema enforces no foreign keys, so referential integrity is an
//! application invariant maintained here: deleting a root entity removes the
//! full dependency closure in one transaction, or nothing at all.
//!
//! The closure is driven by a declarative dependency table rather than
//! per-entity code; supporting a new dependent collection is a new edge in
//! [`DEPENDENCIES`], not new logic.

use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

use crate::api::error::ApiError;
use crate::DbPool;

/// Maximum ids bound into a single IN (...) clause
const BIND_CHUNK: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    User,
    Counselor,
    Appointment,
    ForumPost,
    JournalEntry,
    Chat,
    LiveChatMessage,
    ForumComment,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Counselor => "counselors",
            EntityKind::Appointment => "appointments",
            EntityKind::ForumPost => "forum_posts",
            EntityKind::JournalEntry => "journal_entries",
            EntityKind::Chat => "chats",
            EntityKind::LiveChatMessage => "live_chat_messages",
            EntityKind::ForumComment => "forum_comments",
        }
    }

    /// Deletion rank: higher ranks depend on lower ones and are deleted
    /// first, so the root row is always the last delete in the transaction.
    fn rank(&self) -> u8 {
        match self {
            EntityKind::User => 0,
            EntityKind::Counselor => 1,
            EntityKind::Appointment
            | EntityKind::ForumPost
            | EntityKind::JournalEntry
            | EntityKind::Chat => 2,
            EntityKind::LiveChatMessage | EntityKind::ForumComment => 3,
        }
    }
}

struct DependencyEdge {
    parent: EntityKind,
    child: EntityKind,
    /// Column on the child's table referencing the parent's id
    ref_column: &'static str,
}

/// Which collections exist only by reference to which others.
const DEPENDENCIES: &[DependencyEdge] = &[
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::Counselor,
        ref_column: "user_id",
    },
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::Appointment,
        ref_column: "user_id",
    },
    DependencyEdge {
        parent: EntityKind::Counselor,
        child: EntityKind::Appointment,
        ref_column: "counselor_id",
    },
    DependencyEdge {
        parent: EntityKind::Appointment,
        child: EntityKind::LiveChatMessage,
        ref_column: "appointment_id",
    },
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::ForumPost,
        ref_column: "user_id",
    },
    DependencyEdge {
        parent: EntityKind::ForumPost,
        child: EntityKind::ForumComment,
        ref_column: "post_id",
    },
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::ForumComment,
        ref_column: "user_id",
    },
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::JournalEntry,
        ref_column: "user_id",
    },
    DependencyEdge {
        parent: EntityKind::User,
        child: EntityKind::Chat,
        ref_column: "user_id",
    },
];

/// What a completed cascade removed, per table.
#[derive(Debug, Serialize)]
pub struct DeletionReport {
    pub root_id: String,
    pub deleted: BTreeMap<&'static str, u64>,
}

/// Delete a user together with every record that exists only because the
/// user exists: their counselor profile, appointments on both sides, live
/// chat transcripts, forum posts and comments, journals, and AI chats.
pub async fn delete_user(pool: &DbPool, user_id: &str) -> Result<DeletionReport, ApiError> {
    run_cascade(pool, EntityKind::User, user_id).await
}

/// Delete a counselor profile, its appointments, and their chat transcripts.
/// The owning user account survives.
pub async fn delete_counselor(
    pool: &DbPool,
    counselor_id: &str,
) -> Result<DeletionReport, ApiError> {
    run_cascade(pool, EntityKind::Counselor, counselor_id).await
}

async fn run_cascade(
    pool: &DbPool,
    root: EntityKind,
    root_id: &str,
) -> Result<DeletionReport, ApiError> {
    let mut tx = pool.begin().await?;

    let exists: Option<(String,)> =
        sqlx::query_as(&format!("SELECT id FROM {} WHERE id = ?", root.table()))
            .bind(root_id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Err(ApiError::not_found(format!(
            "{} not found",
            root.table().trim_end_matches('s')
        )));
    }

    // Compute the full closure before mutating anything. Iterate the edge
    // table to a fixpoint; the entity graph is acyclic so this terminates.
    let mut closure: HashMap<EntityKind, HashSet<String>> = HashMap::new();
    closure.insert(root, HashSet::from([root_id.to_string()]));

    let mut changed = true;
    while changed {
        changed = false;
        for edge in DEPENDENCIES {
            let parent_ids: Vec<String> = match closure.get(&edge.parent) {
                Some(ids) if !ids.is_empty() => ids.iter().cloned().collect(),
                _ => continue,
            };
            let child_ids =
                select_ids(&mut tx, edge.child.table(), edge.ref_column, &parent_ids).await?;
            let entry = closure.entry(edge.child).or_default();
            for id in child_ids {
                if entry.insert(id) {
                    changed = true;
                }
            }
        }
    }

    // Delete leaf-to-root: dependents before the records they reference,
    // the root row last.
    let mut kinds: Vec<EntityKind> = closure.keys().copied().collect();
    kinds.sort_by_key(|k| (std::cmp::Reverse(k.rank()), *k));

    let mut deleted = BTreeMap::new();
    for kind in kinds {
        let ids: Vec<String> = closure[&kind].iter().cloned().collect();
        let count = delete_ids(&mut tx, kind.table(), &ids).await?;
        if kind == root && count != 1 {
            // Root row vanished mid-transaction; abort rather than report a
            // cascade that deleted dependents of nothing.
            return Err(ApiError::database("Cascade delete lost its root record"));
        }
        deleted.insert(kind.table(), count);
    }

    tx.commit().await?;

    info!(root = root.table(), root_id = %root_id, ?deleted, "Cascade delete committed");

    Ok(DeletionReport {
        root_id: root_id.to_string(),
        deleted,
    })
}

async fn select_ids(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    column: &str,
    parent_ids: &[String],
) -> Result<Vec<String>, sqlx::Error> {
    let mut out = Vec::new();
    for chunk in parent_ids.chunks(BIND_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT id FROM {} WHERE {} IN ({})",
            table, column, placeholders
        );
        let mut query = sqlx::query_as::<_, (String,)>(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&mut **tx).await?;
        out.extend(rows.into_iter().map(|(id,)| id));
    }
    Ok(out)
}

async fn delete_ids(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    ids: &[String],
) -> Result<u64, sqlx::Error> {
    let mut deleted = 0;
    for chunk in ids.chunks(BIND_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM {} WHERE id IN ({})", table, placeholders);
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(id);
        }
        deleted += query.execute(&mut **tx).await?.rows_affected();
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::db;

    async fn test_pool(dir: &tempfile::TempDir) -> DbPool {
        db::init(dir.path()).await.unwrap()
    }

    async fn exec(pool: &DbPool, sql: &str) {
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    async fn count(pool: &DbPool, table: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    /// One user owning a counselor profile with three appointments (each
    /// with chat messages), a forum post with comments from two sides, a
    /// journal entry, and an AI chat. A second, unrelated user books with
    /// the counselor and posts on the forum.
    async fn seed_graph(pool: &DbPool) {
        exec(pool, "INSERT INTO users (id, email, password_hash, name) VALUES ('root', 'root@example.com', '', 'Root')").await;
        exec(pool, "INSERT INTO users (id, email, password_hash, name) VALUES ('other', 'other@example.com', '', 'Other')").await;
        exec(pool, "INSERT INTO counselors (id, user_id, full_name) VALUES ('c1', 'root', 'Root Counselor')").await;

        for (appt, client) in [("a1", "other"), ("a2", "other"), ("a3", "other")] {
            exec(
                pool,
                &format!(
                    "INSERT INTO appointments (id, user_id, counselor_id, start_time, end_time) \
                     VALUES ('{appt}', '{client}', 'c1', '2026-03-09T10:00:00Z', '2026-03-09T11:00:00Z')"
                ),
            )
            .await;
            exec(
                pool,
                &format!(
                    "INSERT INTO live_chat_messages (id, appointment_id, user_id, body) \
                     VALUES ('m-{appt}', '{appt}', '{client}', 'hello')"
                ),
            )
            .await;
        }

        // Appointment where the root user is the client of someone else
        exec(pool, "INSERT INTO counselors (id, user_id, full_name) VALUES ('c2', 'other', 'Other Counselor')").await;
        exec(pool, "INSERT INTO appointments (id, user_id, counselor_id, start_time, end_time) VALUES ('a4', 'root', 'c2', '2026-03-10T10:00:00Z', '2026-03-10T11:00:00Z')").await;
        exec(pool, "INSERT INTO live_chat_messages (id, appointment_id, user_id, body) VALUES ('m-a4', 'a4', 'root', 'hi')").await;

        exec(pool, "INSERT INTO forum_posts (id, user_id, title, body) VALUES ('p1', 'root', 'title', 'body')").await;
        exec(pool, "INSERT INTO forum_comments (id, post_id, user_id, body) VALUES ('fc1', 'p1', 'other', 'reply')").await;
        exec(pool, "INSERT INTO forum_posts (id, user_id, title, body) VALUES ('p2', 'other', 'title', 'body')").await;
        exec(pool, "INSERT INTO forum_comments (id, post_id, user_id, body) VALUES ('fc2', 'p2', 'root', 'reply')").await;
        exec(pool, "INSERT INTO journal_entries (id, user_id, title, body) VALUES ('j1', 'root', 't', 'b')").await;
        exec(pool, "INSERT INTO chats (id, user_id) VALUES ('ch1', 'root')").await;
    }

    #[tokio::test]
    async fn user_cascade_removes_the_full_closure() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_graph(&pool).await;

        let report = delete_user(&pool, "root").await.unwrap();
        assert_eq!(report.deleted["users"], 1);
        assert_eq!(report.deleted["counselors"], 1);
        // a1-a3 through the owned profile, a4 as client
        assert_eq!(report.deleted["appointments"], 4);
        assert_eq!(report.deleted["live_chat_messages"], 4);
        // p1 authored; fc1 under p1, fc2 authored elsewhere
        assert_eq!(report.deleted["forum_posts"], 1);
        assert_eq!(report.deleted["forum_comments"], 2);
        assert_eq!(report.deleted["journal_entries"], 1);
        assert_eq!(report.deleted["chats"], 1);

        // Nothing referencing the root, its counselor, or its appointments survives
        for table in [
            "appointments",
            "live_chat_messages",
            "forum_posts",
            "forum_comments",
            "journal_entries",
            "chats",
        ] {
            let orphans: (i64,) = sqlx::query_as(&format!(
                "SELECT COUNT(*) FROM {} WHERE id IN \
                 ('a1','a2','a3','a4','m-a1','m-a2','m-a3','m-a4','p1','fc1','fc2','j1','ch1')",
                table
            ))
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(orphans.0, 0, "orphans left in {}", table);
        }

        // The unrelated user and their content survive
        assert_eq!(count(&pool, "users").await, 1);
        assert_eq!(count(&pool, "forum_posts").await, 1);
        assert_eq!(count(&pool, "counselors").await, 1);
    }

    #[tokio::test]
    async fn counselor_cascade_spares_the_owning_user() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_graph(&pool).await;

        let report = delete_counselor(&pool, "c1").await.unwrap();
        assert_eq!(report.deleted["counselors"], 1);
        assert_eq!(report.deleted["appointments"], 3);
        assert_eq!(report.deleted["live_chat_messages"], 3);
        assert!(!report.deleted.contains_key("users"));

        assert_eq!(count(&pool, "users").await, 2);
        assert_eq!(count(&pool, "journal_entries").await, 1);
        // The root user's appointment as a client of c2 is untouched
        assert_eq!(count(&pool, "appointments").await, 1);
    }

    #[tokio::test]
    async fn missing_root_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_graph(&pool).await;

        let err = delete_user(&pool, "ghost").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(count(&pool, "users").await, 2);
        assert_eq!(count(&pool, "appointments").await, 4);
    }

    #[tokio::test]
    async fn failed_root_delete_rolls_back_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(&dir).await;
        seed_graph(&pool).await;

        // Force the final (root user) delete to fail
        exec(
            &pool,
            "CREATE TRIGGER forbid_root_delete BEFORE DELETE ON users \
             WHEN OLD.id = 'root' BEGIN SELECT RAISE(ABORT, 'forced failure'); END",
        )
        .await;

        let result = delete_user(&pool, "root").await;
        assert!(result.is_err());

        // Every record from the earlier steps is still present
        assert_eq!(count(&pool, "users").await, 2);
        assert_eq!(count(&pool, "counselors").await, 2);
        assert_eq!(count(&pool, "appointments").await, 4);
        assert_eq!(count(&pool, "live_chat_messages").await, 4);
        assert_eq!(count(&pool, "forum_posts").await, 2);
        assert_eq!(count(&pool, "forum_comments").await, 2);
        assert_eq!(count(&pool, "journal_entries").await, 1);
        assert_eq!(count(&pool, "chats").await, 1);
    }
}
