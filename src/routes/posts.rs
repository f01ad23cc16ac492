use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::accounts;
use crate::db::models::{Category, Post, PostImage, PostStatus, Role, Tag};
use crate::db::new_id;
use crate::db::posts::{
    self, CategoryInput, CategoryWithCount, NewPost, PostFilter, PostPatch, SlugTable, TagInput,
};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::extractors::{CurrentUser, Json};
use crate::state::AppState;
use crate::storage::upload::{self, MultipartForm};
use crate::storage::{self, Bucket};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/posts/categories/",
            get(list_categories).post(create_category),
        )
        .route(
            "/api/posts/categories/{id}/",
            get(get_category)
                .put(update_category)
                .patch(update_category)
                .delete(delete_category),
        )
        .route("/api/posts/tags/", get(list_tags).post(create_tag))
        .route(
            "/api/posts/tags/{id}/",
            get(get_tag).put(update_tag).patch(update_tag).delete(delete_tag),
        )
        .route("/api/posts/posts/", get(list_posts).post(create_post))
        .route(
            "/api/posts/posts/{id}/",
            get(get_post)
                .put(update_post)
                .patch(update_post)
                .delete(delete_post),
        )
        .route("/api/posts/posts/{id}/images/", post(upload_images))
        .route(
            "/api/posts/posts/{id}/images/{image_id}/",
            delete(delete_image),
        )
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Slug for a new or renamed row. An explicit slug must be free; a derived
/// one gets a numeric suffix until it is.
fn resolve_slug(
    conn: &Connection,
    table: SlugTable,
    explicit: Option<&str>,
    source: &str,
    exclude_id: Option<&str>,
    taken_message: &str,
) -> AppResult<String> {
    match explicit.map(posts::slugify).filter(|s| !s.is_empty()) {
        Some(slug) => {
            if posts::slug_taken(conn, table, &slug, exclude_id)? {
                return Err(AppError::field("slug", taken_message));
            }
            Ok(slug)
        }
        None => Ok(posts::unique_slug(conn, table, &posts::slugify(source))?),
    }
}

// -- Categories --

#[derive(Deserialize)]
struct CategoryQuery {
    slug: Option<String>,
}

async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> AppResult<Json<Vec<CategoryWithCount>>> {
    let conn = state.db.get()?;
    Ok(Json(posts::list_categories(&conn, query.slug.as_deref())?))
}

async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<CategoryWithCount>> {
    let conn = state.db.get()?;
    Ok(Json(posts::find_category(&conn, &id)?.ok_or(AppError::NotFound)?))
}

const CATEGORY_SLUG_TAKEN: &str = "category with this slug already exists.";

async fn create_category(
    State(state): State<AppState>,
    _current: CurrentUser,
    Json(input): Json<CategoryInput>,
) -> AppResult<Response> {
    if blank(input.name.as_deref()) {
        return Err(AppError::field("name", "This field may not be blank."));
    }
    let name = input.name.as_deref().unwrap_or_default().trim();
    let conn = state.db.get()?;
    let slug = resolve_slug(
        &conn,
        SlugTable::Categories,
        input.slug.as_deref(),
        name,
        None,
        CATEGORY_SLUG_TAKEN,
    )?;
    let category = posts::insert_category(&conn, name, &slug, input.description.as_deref())
        .map_err(|e| AppError::unique(e, "slug", CATEGORY_SLUG_TAKEN))?;
    Ok((StatusCode::CREATED, Json(category)).into_response())
}

async fn update_category(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(id): Path<String>,
    Json(mut input): Json<CategoryInput>,
) -> AppResult<Json<Category>> {
    if input.name.is_some() && blank(input.name.as_deref()) {
        return Err(AppError::field("name", "This field may not be blank."));
    }
    let conn = state.db.get()?;
    if input.slug.is_some() {
        input.slug = Some(resolve_slug(
            &conn,
            SlugTable::Categories,
            input.slug.as_deref(),
            input.name.as_deref().unwrap_or_default(),
            Some(&id),
            CATEGORY_SLUG_TAKEN,
        )?);
    }
    let category = posts::update_category(&conn, &id, &input)
        .map_err(|e| AppError::unique(e, "slug", CATEGORY_SLUG_TAKEN))?
        .ok_or(AppError::NotFound)?;
    Ok(Json(category))
}

async fn delete_category(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.db.get()?;
    if !posts::delete_category(&conn, &id)? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

// -- Tags --

const TAG_SLUG_TAKEN: &str = "tag with this slug already exists.";

fn require_admin(current: &CurrentUser) -> AppResult<()> {
    if current.0.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "You do not have permission to perform this action.".to_string(),
        ))
    }
}

async fn list_tags(State(state): State<AppState>) -> AppResult<Json<Vec<Tag>>> {
    let conn = state.db.get()?;
    Ok(Json(posts::list_tags(&conn)?))
}

async fn get_tag(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Tag>> {
    let conn = state.db.get()?;
    Ok(Json(posts::find_tag(&conn, &id)?.ok_or(AppError::NotFound)?))
}

async fn create_tag(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(input): Json<TagInput>,
) -> AppResult<Response> {
    require_admin(&current)?;
    if blank(input.name.as_deref()) {
        return Err(AppError::field("name", "This field may not be blank."));
    }
    let name = input.name.as_deref().unwrap_or_default().trim();
    let conn = state.db.get()?;
    let slug = resolve_slug(
        &conn,
        SlugTable::Tags,
        input.slug.as_deref(),
        name,
        None,
        TAG_SLUG_TAKEN,
    )?;
    let tag = posts::insert_tag(&conn, name, &slug)
        .map_err(|e| AppError::unique(e, "slug", TAG_SLUG_TAKEN))?;
    Ok((StatusCode::CREATED, Json(tag)).into_response())
}

async fn update_tag(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(mut input): Json<TagInput>,
) -> AppResult<Json<Tag>> {
    require_admin(&current)?;
    if input.name.is_some() && blank(input.name.as_deref()) {
        return Err(AppError::field("name", "This field may not be blank."));
    }
    let conn = state.db.get()?;
    if input.slug.is_some() {
        input.slug = Some(resolve_slug(
            &conn,
            SlugTable::Tags,
            input.slug.as_deref(),
            input.name.as_deref().unwrap_or_default(),
            Some(&id),
            TAG_SLUG_TAKEN,
        )?);
    }
    let tag = posts::update_tag(&conn, &id, &input)
        .map_err(|e| AppError::unique(e, "slug", TAG_SLUG_TAKEN))?
        .ok_or(AppError::NotFound)?;
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    require_admin(&current)?;
    let conn = state.db.get()?;
    if !posts::delete_tag(&conn, &id)? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

// -- Posts --

#[derive(Debug, Serialize)]
pub struct AuthorView {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub img_url: Option<String>,
}

/// Post with its relations expanded, as returned by list and retrieve.
#[derive(Debug, Serialize)]
pub struct PostDetail {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub category: Option<Category>,
    pub author: Option<AuthorView>,
    pub tags: Vec<Tag>,
    pub resources: Vec<String>,
    pub images: Vec<PostImage>,
    pub video_url: Option<String>,
    pub views: i64,
    pub status: PostStatus,
    pub likes_count: i64,
    pub comments_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

fn post_detail(conn: &Connection, post: Post) -> AppResult<PostDetail> {
    let category = posts::category_by_id(conn, &post.category_id)?;
    let author = accounts::find_user_by_id(conn, &post.author_id)?.map(|u| AuthorView {
        id: u.id,
        first_name: u.first_name,
        last_name: u.last_name,
        img_url: u.img_url,
    });
    let (likes_count, comments_count) = posts::post_counts(conn, &post.id)?;
    Ok(PostDetail {
        category,
        author,
        tags: posts::tags_for_post(conn, &post.id)?,
        resources: posts::resource_ids_for_post(conn, &post.id)?,
        images: posts::images_for_post(conn, &post.id)?,
        likes_count,
        comments_count,
        id: post.id,
        title: post.title,
        slug: post.slug,
        content: post.content,
        video_url: post.video_url,
        views: post.views,
        status: post.status,
        created_at: post.created_at,
        updated_at: post.updated_at,
    })
}

fn load_post(conn: &Connection, id: &str) -> AppResult<Post> {
    posts::find_post(conn, id)?.ok_or(AppError::NotFound)
}

fn load_own_post(conn: &Connection, current: &CurrentUser, id: &str) -> AppResult<Post> {
    let post = load_post(conn, id)?;
    if !current.can_modify(&post.author_id) {
        return Err(AppError::Forbidden(
            "Only the author or an admin may change this post.".to_string(),
        ));
    }
    Ok(post)
}

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    #[serde(rename = "category__slug")]
    pub category_slug: Option<String>,
    pub search: Option<String>,
    pub ordering: Option<String>,
}

impl From<PostQuery> for PostFilter {
    fn from(q: PostQuery) -> Self {
        PostFilter {
            category_slug: q.category_slug,
            search: q.search,
            // Unknown ordering values fall back to newest first
            oldest_first: q.ordering.as_deref() == Some("created_at"),
        }
    }
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PostQuery>,
) -> AppResult<Json<Vec<PostDetail>>> {
    let conn = state.db.get()?;
    let details = posts::list_posts(&conn, &query.into())?
        .into_iter()
        .map(|p| post_detail(&conn, p))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Json(details))
}

/// GET /api/posts/posts/{id}/ counts as a view.
async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<PostDetail>> {
    let conn = state.db.get()?;
    load_post(&conn, &id)?;
    posts::increment_views(&conn, &id)?;
    let post = load_post(&conn, &id)?;
    Ok(Json(post_detail(&conn, post)?))
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub title: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(alias = "category")]
    pub category_id: Option<String>,
    pub video_url: Option<String>,
    pub status: Option<PostStatus>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}

const POST_SLUG_TAKEN: &str = "post with this slug already exists.";

/// Check the foreign keys a create or patch refers to.
fn validate_relations(
    conn: &Connection,
    category_id: Option<&str>,
    tag_ids: Option<&[String]>,
    resource_ids: Option<&[String]>,
) -> AppResult<()> {
    let mut errors = FieldErrors::new();
    if let Some(id) = category_id {
        if posts::category_by_id(conn, id)?.is_none() {
            errors.insert(
                "category_id".into(),
                vec![format!("Invalid pk \"{}\" - object does not exist.", id)],
            );
        }
    }
    for (field, table, ids) in [("tag_ids", "tags", tag_ids), ("resource_ids", "resources", resource_ids)] {
        if let Some(ids) = ids {
            let missing = posts::missing_ids(conn, table, ids)?;
            if !missing.is_empty() {
                errors.insert(
                    field.into(),
                    missing
                        .iter()
                        .map(|id| format!("Invalid pk \"{}\" - object does not exist.", id))
                        .collect(),
                );
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

async fn create_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(req): Json<CreatePostRequest>,
) -> AppResult<Response> {
    let mut errors = FieldErrors::new();
    if req.title.trim().is_empty() {
        errors.insert("title".into(), vec!["This field may not be blank.".into()]);
    }
    if req.content.trim().is_empty() {
        errors.insert("content".into(), vec!["This field may not be blank.".into()]);
    }
    if blank(req.category_id.as_deref()) {
        errors.insert("category_id".into(), vec!["This field is required.".into()]);
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    let category_id = req.category_id.clone().unwrap_or_default();

    let mut conn = state.db.get()?;
    validate_relations(
        &conn,
        Some(&category_id),
        Some(req.tag_ids.as_slice()),
        Some(req.resource_ids.as_slice()),
    )?;

    let tx = conn.transaction()?;
    let slug = resolve_slug(
        &tx,
        SlugTable::Posts,
        req.slug.as_deref(),
        &req.title,
        None,
        POST_SLUG_TAKEN,
    )?;
    let post = posts::insert_post(
        &tx,
        &NewPost {
            title: req.title.trim().to_string(),
            slug,
            content: req.content,
            category_id,
            author_id: current.id().to_string(),
            video_url: req.video_url.filter(|v| !v.is_empty()),
            status: req.status.unwrap_or(PostStatus::Draft),
            tag_ids: req.tag_ids,
            resource_ids: req.resource_ids,
        },
    )
    .map_err(|e| AppError::unique(e, "slug", POST_SLUG_TAKEN))?;
    tx.commit()?;

    tracing::info!(post_id = %post.id, author = %current.id(), "post created");
    let detail = post_detail(&conn, post)?;
    Ok((StatusCode::CREATED, Json(detail)).into_response())
}

async fn update_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(mut patch): Json<PostPatch>,
) -> AppResult<Json<PostDetail>> {
    let mut errors = FieldErrors::new();
    if patch.title.is_some() && blank(patch.title.as_deref()) {
        errors.insert("title".into(), vec!["This field may not be blank.".into()]);
    }
    if patch.content.is_some() && blank(patch.content.as_deref()) {
        errors.insert("content".into(), vec!["This field may not be blank.".into()]);
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let mut conn = state.db.get()?;
    let existing = load_own_post(&conn, &current, &id)?;
    validate_relations(
        &conn,
        patch.category_id.as_deref(),
        patch.tag_ids.as_deref(),
        patch.resource_ids.as_deref(),
    )?;

    let tx = conn.transaction()?;
    if patch.slug.is_some() {
        patch.slug = Some(resolve_slug(
            &tx,
            SlugTable::Posts,
            patch.slug.as_deref(),
            &existing.title,
            Some(&id),
            POST_SLUG_TAKEN,
        )?);
    }
    let post = posts::update_post(&tx, &id, &patch)
        .map_err(|e| AppError::unique(e, "slug", POST_SLUG_TAKEN))?
        .ok_or(AppError::NotFound)?;
    tx.commit()?;

    Ok(Json(post_detail(&conn, post)?))
}

async fn delete_post(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let images = {
        let conn = state.db.get()?;
        load_own_post(&conn, &current, &id)?;
        let images = posts::images_for_post(&conn, &id)?;
        posts::delete_post(&conn, &id)?;
        images
    };

    for image in images {
        if let Err(e) = state.storage.delete(Bucket::Images, &image.object_key).await {
            tracing::warn!("could not remove image {}: {}", image.object_key, e);
        }
    }
    tracing::info!(post_id = %id, actor = %current.id(), "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

// -- Post images --

/// POST /api/posts/posts/{id}/images/
///
/// The whole batch is validated before any object is stored.
async fn upload_images(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Response> {
    let existing = {
        let conn = state.db.get()?;
        load_own_post(&conn, &current, &id)?;
        posts::count_images(&conn, &id)?
    };

    let form = MultipartForm::read(multipart).await?;
    let files = form.files_named("images");
    upload::validate_post_images(existing, &files)?;

    let mut stored: Vec<(String, String, String)> = Vec::with_capacity(files.len());
    for file in &files {
        let image_id = new_id();
        let key = format!("{}/{}.{}", id, image_id, file.extension().unwrap_or_default());
        if let Err(e) = state.storage.put(Bucket::Images, &key, file.data.clone()).await {
            let keys: Vec<&str> = stored.iter().map(|(_, key, _)| key.as_str()).collect();
            storage::discard(state.storage.as_ref(), Bucket::Images, &keys).await;
            return Err(e.into());
        }
        let url = state.storage.public_url(Bucket::Images, &key);
        stored.push((image_id, key, url));
    }

    let images = match insert_images(&state, &id, &stored) {
        Ok(images) => images,
        Err(e) => {
            let keys: Vec<&str> = stored.iter().map(|(_, key, _)| key.as_str()).collect();
            storage::discard(state.storage.as_ref(), Bucket::Images, &keys).await;
            return Err(e);
        }
    };

    tracing::info!(post_id = %id, count = images.len(), "post images uploaded");
    Ok((StatusCode::CREATED, Json(images)).into_response())
}

/// Insert rows for already stored images. The count is read again under a
/// write lock so concurrent batches cannot overfill the post together.
fn insert_images(
    state: &AppState,
    post_id: &str,
    stored: &[(String, String, String)],
) -> AppResult<Vec<PostImage>> {
    let mut conn = state.db.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if posts::find_post(&tx, post_id)?.is_none() {
        return Err(AppError::NotFound);
    }
    upload::check_image_capacity(posts::count_images(&tx, post_id)?, stored.len())?;
    let mut images = Vec::with_capacity(stored.len());
    for (image_id, key, url) in stored {
        images.push(posts::insert_image(&tx, image_id, post_id, key, url)?);
    }
    tx.commit()?;
    Ok(images)
}

async fn delete_image(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((id, image_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let image = {
        let conn = state.db.get()?;
        load_own_post(&conn, &current, &id)?;
        let image = posts::find_image(&conn, &image_id)?
            .filter(|img| img.post_id == id)
            .ok_or(AppError::NotFound)?;
        posts::delete_image(&conn, &image.id)?;
        image
    };
    state.storage.delete(Bucket::Images, &image.object_key).await?;
    Ok(StatusCode::NO_CONTENT)
}
