use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::interactions::{self, CommentThread, MarkTable};
use crate::db::models::{Comment, PostMark};
use crate::db::posts;
use crate::error::{AppError, AppResult, FieldErrors};
use crate::extractors::{CurrentUser, Json};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/interactions/comments/",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/interactions/comments/{id}/",
            get(get_comment)
                .put(update_comment)
                .patch(update_comment)
                .delete(delete_comment),
        )
        .route(
            "/api/interactions/comments/by-post/{post_id}/",
            get(comments_by_post),
        )
        .route("/api/interactions/likes/", get(list_likes).post(create_like))
        .route("/api/interactions/likes/{id}/", delete(delete_like))
        .route(
            "/api/interactions/likes/by-post/{post_id}/",
            get(likes_by_post),
        )
        .route(
            "/api/interactions/bookmarks/",
            get(list_bookmarks).post(create_bookmark),
        )
        .route("/api/interactions/bookmarks/{id}/", delete(delete_bookmark))
}

fn require_post(conn: &Connection, post_id: &str) -> AppResult<()> {
    match posts::find_post(conn, post_id)? {
        Some(_) => Ok(()),
        None => Err(AppError::field(
            "post",
            format!("Invalid pk \"{}\" - object does not exist.", post_id),
        )),
    }
}

// -- Comments --

#[derive(Deserialize)]
struct CommentQuery {
    post: Option<String>,
}

async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<CommentQuery>,
) -> AppResult<Json<Vec<Comment>>> {
    let conn = state.db.get()?;
    Ok(Json(interactions::list_comments(&conn, query.post.as_deref())?))
}

async fn get_comment(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Comment>> {
    let conn = state.db.get()?;
    Ok(Json(interactions::find_comment(&conn, &id)?.ok_or(AppError::NotFound)?))
}

/// Top-level comments of a post, replies nested under each.
async fn comments_by_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<CommentThread>>> {
    let conn = state.db.get()?;
    let comments = interactions::list_comments(&conn, Some(&post_id))?;
    Ok(Json(interactions::build_threads(comments)))
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    #[serde(default)]
    pub post: String,
    #[serde(default)]
    pub content: String,
    pub parent_comment: Option<String>,
}

async fn create_comment(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreateCommentRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    if req.post.trim().is_empty() {
        errors.insert("post".into(), vec!["This field is required.".into()]);
    }
    if req.content.trim().is_empty() {
        errors.insert("content".into(), vec!["This field may not be blank.".into()]);
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let conn = state.db.get()?;
    require_post(&conn, &req.post)?;
    let parent = req.parent_comment.as_deref().filter(|p| !p.is_empty());
    if let Some(parent_id) = parent {
        let same_post = interactions::find_comment(&conn, parent_id)?
            .is_some_and(|c| c.post_id == req.post);
        if !same_post {
            return Err(AppError::field(
                "parent_comment",
                "Parent comment must belong to the same post.",
            ));
        }
    }

    let comment = interactions::insert_comment(&conn, &req.post, current.id(), &req.content, parent)?;
    tracing::debug!(comment_id = %comment.id, post_id = %comment.post_id, "comment created");
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: Option<String>,
}

fn load_own_comment(conn: &Connection, current: &CurrentUser, id: &str) -> AppResult<Comment> {
    let comment = interactions::find_comment(conn, id)?.ok_or(AppError::NotFound)?;
    if !current.can_modify(&comment.user_id) {
        return Err(AppError::Forbidden(
            "Only the author or an admin may change this comment.".to_string(),
        ));
    }
    Ok(comment)
}

async fn update_comment(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCommentRequest>,
) -> AppResult<Json<Comment>> {
    let conn = state.db.get()?;
    let comment = load_own_comment(&conn, &current, &id)?;
    let Some(content) = req.content else {
        return Ok(Json(comment));
    };
    if content.trim().is_empty() {
        return Err(AppError::field("content", "This field may not be blank."));
    }
    let updated = interactions::update_comment(&conn, &id, &content)?.ok_or(AppError::NotFound)?;
    Ok(Json(updated))
}

async fn delete_comment(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    load_own_comment(&conn, &current, &id)?;
    interactions::delete_comment(&conn, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

// -- Likes and bookmarks --

#[derive(Debug, Deserialize)]
pub struct MarkRequest {
    #[serde(default)]
    pub post: String,
}

fn duplicate_message(table: MarkTable) -> &'static str {
    match table {
        MarkTable::Likes => "You have already liked this post.",
        MarkTable::Bookmarks => "You have already bookmarked this post.",
    }
}

fn create_mark(
    state: &AppState,
    table: MarkTable,
    current: &CurrentUser,
    req: MarkRequest,
) -> AppResult<Response> {
    if req.post.trim().is_empty() {
        return Err(AppError::field("post", "This field is required."));
    }
    let conn = state.db.get()?;
    require_post(&conn, &req.post)?;
    let mark = interactions::insert_mark(&conn, table, current.id(), &req.post).map_err(|e| {
        if crate::db::is_unique_violation(&e) {
            AppError::Conflict(duplicate_message(table).to_string())
        } else {
            AppError::Database(e)
        }
    })?;
    Ok((StatusCode::CREATED, Json(mark)).into_response())
}

/// Marks can only be removed by the user who made them.
fn delete_mark(state: &AppState, table: MarkTable, current: &CurrentUser, id: &str) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    let mark = interactions::find_mark(&conn, table, id)?
        .filter(|m| m.user_id == current.id())
        .ok_or(AppError::NotFound)?;
    interactions::delete_mark(&conn, table, &mark.id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_likes(State(state): State<AppState>, current: CurrentUser) -> AppResult<Json<Vec<PostMark>>> {
    let conn = state.db.get()?;
    Ok(Json(interactions::marks_for_user(&conn, MarkTable::Likes, current.id())?))
}

async fn create_like(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<MarkRequest>,
) -> AppResult<Response> {
    create_mark(&state, MarkTable::Likes, &current, req)
}

async fn delete_like(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    delete_mark(&state, MarkTable::Likes, &current, &id)
}

async fn likes_by_post(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(post_id): Path<String>,
) -> AppResult<Json<Vec<PostMark>>> {
    let conn = state.db.get()?;
    Ok(Json(interactions::marks_for_post(&conn, MarkTable::Likes, &post_id)?))
}

async fn list_bookmarks(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<PostMark>>> {
    let conn = state.db.get()?;
    Ok(Json(interactions::marks_for_user(&conn, MarkTable::Bookmarks, current.id())?))
}

async fn create_bookmark(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<MarkRequest>,
) -> AppResult<Response> {
    create_mark(&state, MarkTable::Bookmarks, &current, req)
}

async fn delete_bookmark(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    delete_mark(&state, MarkTable::Bookmarks, &current, &id)
}
