use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::models::{Resource, Tool};
use crate::db::new_id;
use crate::db::resources::{self, NewResource, ResourceFilter, ResourcePatch};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::extractors::{CurrentUser, Json};
use crate::state::AppState;
use crate::storage::upload::{self, MultipartForm, UploadedFile};
use crate::storage::{self, Bucket};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/resources/", get(list_resources).post(create_resource))
        .route("/api/resources/user/", get(my_resources))
        .route(
            "/api/resources/{id}/",
            get(get_resource)
                .put(update_resource)
                .patch(update_resource)
                .delete(delete_resource),
        )
        .route("/api/resources/{id}/download/", get(download_resource))
}

/// Resource metadata. The file itself is only reachable through the
/// authenticated download endpoint.
#[derive(Debug, Serialize)]
pub struct ResourceView {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub tool: Tool,
    pub file: String,
    pub file_name: String,
    pub user: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Resource> for ResourceView {
    fn from(r: Resource) -> Self {
        Self {
            file: format!("/api/resources/{}/download/", r.id),
            id: r.id,
            title: r.title,
            description: r.description,
            tool: r.tool,
            file_name: r.file_name,
            user: r.user_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub search: Option<String>,
    pub tool: Option<String>,
}

fn parse_tool(value: &str) -> AppResult<Tool> {
    value.parse::<Tool>().map_err(|e| AppError::field("tool", e))
}

fn list(conn: &Connection, filter: &ResourceFilter) -> AppResult<Vec<ResourceView>> {
    Ok(resources::list_resources(conn, filter)?
        .into_iter()
        .map(ResourceView::from)
        .collect())
}

async fn list_resources(
    State(state): State<AppState>,
    Query(query): Query<ResourceQuery>,
) -> AppResult<Json<Vec<ResourceView>>> {
    let tool = query
        .tool
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(parse_tool)
        .transpose()?;
    let conn = state.db.get()?;
    let filter = ResourceFilter {
        search: query.search,
        tool,
        user_id: None,
    };
    Ok(Json(list(&conn, &filter)?))
}

async fn my_resources(
    State(state): State<AppState>,
    current: CurrentUser,
) -> AppResult<Json<Vec<ResourceView>>> {
    let conn = state.db.get()?;
    let filter = ResourceFilter {
        user_id: Some(current.id().to_string()),
        ..Default::default()
    };
    Ok(Json(list(&conn, &filter)?))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ResourceView>> {
    let conn = state.db.get()?;
    let resource = resources::find_resource(&conn, &id)?.ok_or(AppError::NotFound)?;
    Ok(Json(resource.into()))
}

/// GET /api/resources/{id}/download/
async fn download_resource(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let resource = {
        let conn = state.db.get()?;
        resources::find_resource(&conn, &id)?.ok_or(AppError::NotFound)?
    };
    let data = state.storage.get(Bucket::Resources, &resource.file_key).await?;
    tracing::debug!(resource_id = %id, user = %current.id(), "resource downloaded");

    let mime = mime_guess::from_path(&resource.file_name).first_or_octet_stream();
    let disposition = format!(
        "attachment; filename=\"{}\"",
        resource.file_name.replace(['"', '\\'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, mime.essence_str().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

fn required_text(form: &MultipartForm, name: &str, errors: &mut FieldErrors) -> Option<String> {
    match form.text(name).map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => Some(value.to_string()),
        None => {
            errors.insert(name.to_string(), vec!["This field is required.".into()]);
            None
        }
    }
}

async fn store_file(state: &AppState, file: &UploadedFile) -> AppResult<String> {
    let key = format!("{}.json", new_id());
    state
        .storage
        .put(Bucket::Resources, &key, file.data.clone())
        .await?;
    Ok(key)
}

async fn create_resource(
    State(state): State<AppState>,
    current: CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let mut form = MultipartForm::read(multipart).await?;

    let mut errors = FieldErrors::new();
    let title = required_text(&form, "title", &mut errors);
    let tool = match required_text(&form, "tool", &mut errors).map(|t| t.parse::<Tool>()) {
        Some(Ok(tool)) => Some(tool),
        Some(Err(e)) => {
            errors.insert("tool".into(), vec![e]);
            None
        }
        None => None,
    };
    let file = form.take_file("file");
    if file.is_none() {
        errors.insert("file".into(), vec!["No file was submitted.".into()]);
    }
    let (Some(title), Some(tool), Some(file)) = (title, tool, file) else {
        return Err(AppError::Validation(errors));
    };
    upload::validate_resource_file(&file)?;
    let description = form.text("description").map(str::to_string);

    let key = store_file(&state, &file).await?;
    let id = new_id();
    let conn = state.db.get()?;
    let inserted = resources::insert_resource(
        &conn,
        &NewResource {
            id: &id,
            user_id: current.id(),
            title: &title,
            description: description.as_deref(),
            tool,
            file_key: &key,
            file_name: &file.file_name,
        },
    );
    let resource = match inserted {
        Ok(resource) => resource,
        Err(e) => {
            storage::discard(state.storage.as_ref(), Bucket::Resources, &[&key]).await;
            return Err(e.into());
        }
    };

    tracing::info!(resource_id = %resource.id, user = %current.id(), "resource uploaded");
    Ok((StatusCode::CREATED, Json(ResourceView::from(resource))).into_response())
}

fn load_own_resource(conn: &Connection, current: &CurrentUser, id: &str) -> AppResult<Resource> {
    let resource = resources::find_resource(conn, id)?.ok_or(AppError::NotFound)?;
    if !current.can_modify(&resource.user_id) {
        return Err(AppError::Forbidden(
            "Only the owner or an admin may change this resource.".to_string(),
        ));
    }
    Ok(resource)
}

fn write_patch(state: &AppState, id: &str, patch: &ResourcePatch) -> AppResult<Resource> {
    let conn = state.db.get()?;
    resources::update_resource(&conn, id, patch)?.ok_or(AppError::NotFound)
}

/// Multipart partial update; a new `file` replaces the stored object.
async fn update_resource(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<Json<ResourceView>> {
    let existing = {
        let conn = state.db.get()?;
        load_own_resource(&conn, &current, &id)?
    };

    let mut form = MultipartForm::read(multipart).await?;
    let title = form.text("title").map(str::trim).map(str::to_string);
    if title.as_deref().is_some_and(str::is_empty) {
        return Err(AppError::field("title", "This field may not be blank."));
    }
    let tool = form.text("tool").map(parse_tool).transpose()?;
    let description = form.text("description").map(str::to_string);
    let file = form.take_file("file");
    if let Some(file) = &file {
        upload::validate_resource_file(file)?;
    }

    let replacement = match &file {
        Some(file) => Some((store_file(&state, file).await?, file.file_name.clone())),
        None => None,
    };
    let patch = ResourcePatch {
        title,
        description,
        tool,
        file: replacement.clone(),
    };
    let updated = match write_patch(&state, &id, &patch) {
        Ok(updated) => updated,
        Err(e) => {
            if let Some((key, _)) = &replacement {
                storage::discard(state.storage.as_ref(), Bucket::Resources, &[key]).await;
            }
            return Err(e);
        }
    };

    if replacement.is_some() {
        if let Err(e) = state.storage.delete(Bucket::Resources, &existing.file_key).await {
            tracing::warn!("could not remove replaced resource {}: {}", existing.file_key, e);
        }
    }
    Ok(Json(updated.into()))
}

async fn delete_resource(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let resource = {
        let conn = state.db.get()?;
        let resource = load_own_resource(&conn, &current, &id)?;
        resources::delete_resource(&conn, &id)?;
        resource
    };
    if let Err(e) = state.storage.delete(Bucket::Resources, &resource.file_key).await {
        tracing::warn!("could not remove resource file {}: {}", resource.file_key, e);
    }
    tracing::info!(resource_id = %id, actor = %current.id(), "resource deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_points_at_download_endpoint() {
        let view = ResourceView::from(Resource {
            id: "r1".into(),
            user_id: "u1".into(),
            title: "Flow".into(),
            description: None,
            tool: Tool::N8n,
            file_key: "abc.json".into(),
            file_name: "flow.json".into(),
            created_at: "2024-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["file"], "/api/resources/r1/download/");
        assert_eq!(json["tool"], "n8n");
        assert_eq!(json["user"], "u1");
        assert!(json.get("file_key").is_none());
    }

    #[test]
    fn unknown_tool_is_a_field_error() {
        assert_eq!(parse_tool("Zapier").ok(), None);
        assert_eq!(parse_tool("Relevance AI").ok(), Some(Tool::RelevanceAi));
    }
}
