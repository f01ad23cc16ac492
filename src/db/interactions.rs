//! Comments, likes and bookmarks.

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::models::{Comment, PostMark};
use super::new_id;

pub fn list_comments(conn: &Connection, post_id: Option<&str>) -> rusqlite::Result<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments WHERE ?1 IS NULL OR post_id = ?1 ORDER BY created_at ASC, id ASC",
        Comment::COLUMNS
    ))?;
    let comments = stmt
        .query_map(params![post_id], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

pub fn find_comment(conn: &Connection, id: &str) -> rusqlite::Result<Option<Comment>> {
    conn.query_row(
        &format!("SELECT {} FROM comments WHERE id = ?1", Comment::COLUMNS),
        params![id],
        Comment::from_row,
    )
    .optional()
}

pub fn insert_comment(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
    content: &str,
    parent_comment_id: Option<&str>,
) -> rusqlite::Result<Comment> {
    let id = new_id();
    conn.execute(
        "INSERT INTO comments (id, post_id, user_id, content, parent_comment_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, post_id, user_id, content, parent_comment_id],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM comments WHERE id = ?1", Comment::COLUMNS),
        params![id],
        Comment::from_row,
    )
}

pub fn update_comment(conn: &Connection, id: &str, content: &str) -> rusqlite::Result<Option<Comment>> {
    let changed = conn.execute(
        "UPDATE comments SET content = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, content],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_comment(conn, id)
}

/// Deleting a comment removes its replies through the parent FK.
pub fn delete_comment(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM comments WHERE id = ?1", params![id])? > 0)
}

/// A comment with its replies nested under it.
#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentThread>,
}

/// Nest a flat, chronologically ordered comment list under its top-level
/// comments. Replies whose parent is not in the list are dropped.
pub fn build_threads(comments: Vec<Comment>) -> Vec<CommentThread> {
    let mut children: HashMap<String, Vec<Comment>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in comments {
        match comment.parent_comment_id.clone() {
            Some(parent) => children.entry(parent).or_default().push(comment),
            None => roots.push(comment),
        }
    }

    fn attach(comment: Comment, children: &mut HashMap<String, Vec<Comment>>) -> CommentThread {
        let replies = children
            .remove(&comment.id)
            .unwrap_or_default()
            .into_iter()
            .map(|reply| attach(reply, children))
            .collect();
        CommentThread { comment, replies }
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut children))
        .collect()
}

/// Likes and bookmarks share one shape.
#[derive(Debug, Clone, Copy)]
pub enum MarkTable {
    Likes,
    Bookmarks,
}

impl MarkTable {
    fn name(&self) -> &'static str {
        match self {
            MarkTable::Likes => "likes",
            MarkTable::Bookmarks => "bookmarks",
        }
    }
}

pub fn marks_for_user(conn: &Connection, table: MarkTable, user_id: &str) -> rusqlite::Result<Vec<PostMark>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        PostMark::COLUMNS,
        table.name()
    ))?;
    let marks = stmt
        .query_map(params![user_id], PostMark::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

pub fn marks_for_post(conn: &Connection, table: MarkTable, post_id: &str) -> rusqlite::Result<Vec<PostMark>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE post_id = ?1 ORDER BY created_at ASC, id ASC",
        PostMark::COLUMNS,
        table.name()
    ))?;
    let marks = stmt
        .query_map(params![post_id], PostMark::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

pub fn find_mark(conn: &Connection, table: MarkTable, id: &str) -> rusqlite::Result<Option<PostMark>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE id = ?1",
            PostMark::COLUMNS,
            table.name()
        ),
        params![id],
        PostMark::from_row,
    )
    .optional()
}

/// Fails with a unique-constraint error when the pair already exists.
pub fn insert_mark(
    conn: &Connection,
    table: MarkTable,
    user_id: &str,
    post_id: &str,
) -> rusqlite::Result<PostMark> {
    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, user_id, post_id) VALUES (?1, ?2, ?3)",
            table.name()
        ),
        params![id, user_id, post_id],
    )?;
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE id = ?1",
            PostMark::COLUMNS,
            table.name()
        ),
        params![id],
        PostMark::from_row,
    )
}

pub fn delete_mark(conn: &Connection, table: MarkTable, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table.name()),
        params![id],
    )? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::is_unique_violation;
    use crate::db::posts::fixtures::{author, post};
    use crate::db::test_pool;

    #[test]
    fn threads_nest_replies_under_parents() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = author(&conn, "c@x.com");
        let p = post(&conn, &user, "Threaded", "news");

        let top = insert_comment(&conn, &p.id, &user, "first", None).unwrap();
        let reply = insert_comment(&conn, &p.id, &user, "reply", Some(&top.id)).unwrap();
        insert_comment(&conn, &p.id, &user, "nested", Some(&reply.id)).unwrap();
        insert_comment(&conn, &p.id, &user, "second", None).unwrap();

        let threads = build_threads(list_comments(&conn, Some(&p.id)).unwrap());
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].comment.content, "first");
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].comment.content, "reply");
        assert_eq!(threads[0].replies[0].replies[0].comment.content, "nested");
        assert!(threads[1].replies.is_empty());

        let json = serde_json::to_value(&threads[0]).unwrap();
        assert_eq!(json["post"], p.id.as_str());
        assert!(json["parent_comment"].is_null());
        assert_eq!(json["replies"][0]["parent_comment"], top.id.as_str());
    }

    #[test]
    fn deleting_parent_removes_replies() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = author(&conn, "c@x.com");
        let p = post(&conn, &user, "Threaded", "news");
        let top = insert_comment(&conn, &p.id, &user, "first", None).unwrap();
        let reply = insert_comment(&conn, &p.id, &user, "reply", Some(&top.id)).unwrap();

        assert!(delete_comment(&conn, &top.id).unwrap());
        assert!(find_comment(&conn, &reply.id).unwrap().is_none());
    }

    #[test]
    fn like_is_unique_per_user_and_post() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = author(&conn, "l@x.com");
        let p = post(&conn, &user, "Likeable", "news");

        insert_mark(&conn, MarkTable::Likes, &user, &p.id).unwrap();
        let err = insert_mark(&conn, MarkTable::Likes, &user, &p.id).unwrap_err();
        assert!(is_unique_violation(&err));

        // Bookmarking the same post is a separate table
        insert_mark(&conn, MarkTable::Bookmarks, &user, &p.id).unwrap();
        assert_eq!(marks_for_post(&conn, MarkTable::Likes, &p.id).unwrap().len(), 1);
        assert_eq!(marks_for_user(&conn, MarkTable::Bookmarks, &user).unwrap().len(), 1);
    }
}
