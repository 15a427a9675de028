use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::dto::{BulkResult, FormView, IdsRequest, ListQuery, Page, SchemaQuery, UserDetails, UserListItem};
use super::export::ExportFile;
use super::form::UserForm;
use super::photo::PhotoUpload;
use super::repo_types::Role;
use super::services;
use crate::auth::{extractors::AuthUser, AuthResponse};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::state::AppState;

/// Headroom over the photo limit for the text fields of a submission.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn routes(photo_max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/create", get(create_form).post(create_user))
        .route("/users/export", get(export_all).post(export_selected))
        .route("/users/bulk-delete", post(bulk_delete))
        .route("/users/:id", get(show_user).delete(delete_user))
        .route("/users/:id/edit", get(edit_form).post(update_user))
        .route("/users/:id/restore", post(restore_user))
        .route("/users/:id/impersonate", post(impersonate))
        .route("/users/:id/photo", get(photo))
        .route("/roles", get(list_roles))
        .layer(DefaultBodyLimit::max(photo_max_bytes + FORM_OVERHEAD_BYTES))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Maps a multipart failure to a response; a body cut off at the size limit
/// can only come from the photo, so it is reported against that field.
fn multipart_error(e: MultipartError, photo_max_bytes: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::Validation(FieldErrors::single(
            "photo",
            format!(
                "The photo may not be greater than {} kilobytes.",
                photo_max_bytes / 1024
            ),
        ));
    }
    AppError::BadRequest(format!("invalid multipart body: {}", e))
}

/// A create/edit submission decoded from `multipart/form-data`.
struct Submission {
    form: UserForm,
    reset_password: bool,
    photo: Option<PhotoUpload>,
}

async fn read_submission(mut mp: Multipart, photo_max_bytes: usize) -> AppResult<Submission> {
    let mut form = UserForm::default();
    let mut reset_password = false;
    let mut photo = None;
    let fail = |e: MultipartError| multipart_error(e, photo_max_bytes);

    while let Some(field) = mp.next_field().await.map_err(fail)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "photo" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(fail)?;
                // browsers send an empty part when no file was chosen
                if !body.is_empty() {
                    photo = Some(PhotoUpload { body, content_type });
                }
            }
            "role_ids" | "role_ids[]" => {
                let text = field.text().await.map_err(fail)?;
                let text = text.trim();
                if !text.is_empty() {
                    match Uuid::parse_str(text) {
                        Ok(id) => form.role_ids.push(id),
                        Err(_) => form.unparsed_role_ids.push(text.to_string()),
                    }
                }
            }
            "name" => form.name = field.text().await.map_err(fail)?,
            "email" => form.email = field.text().await.map_err(fail)?,
            "telp" => form.telp = Some(field.text().await.map_err(fail)?),
            "address" => form.address = Some(field.text().await.map_err(fail)?),
            "password" => form.password = Some(field.text().await.map_err(fail)?),
            "reset_password" => {
                reset_password = parse_bool(&field.text().await.map_err(fail)?)
            }
            _ => debug!(field = %name, "ignoring unknown form field"),
        }
    }

    Ok(Submission {
        form,
        reset_password,
        photo,
    })
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(q): Query<ListQuery>,
) -> AppResult<Json<Page<UserListItem>>> {
    Ok(Json(services::list_users(&state, &q).await?))
}

#[instrument(skip(state))]
pub async fn create_form(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<FormView>> {
    Ok(Json(services::create_form(&state).await?))
}

#[instrument(skip(state, mp))]
pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<impl IntoResponse> {
    let sub = read_submission(mp, state.config.photo.max_bytes).await?;
    let details = services::create_user(&state, sub.form, sub.photo).await?;
    let location = format!("/api/v1/admin/users/{}", details.id);
    debug!(operator = %auth.user_id, user_id = %details.id, "create submitted");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(details),
    ))
}

#[instrument(skip(state))]
pub async fn show_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserDetails>> {
    Ok(Json(services::get_user(&state, id).await?))
}

#[instrument(skip(state))]
pub async fn edit_form(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
    Query(q): Query<SchemaQuery>,
) -> AppResult<Json<FormView>> {
    Ok(Json(services::edit_form(&state, id, q.reset_password).await?))
}

#[instrument(skip(state, mp))]
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> AppResult<Json<UserDetails>> {
    let sub = read_submission(mp, state.config.photo.max_bytes).await?;
    debug!(operator = %auth.user_id, user_id = %id, reset_password = sub.reset_password, "edit submitted");
    let details = services::update_user(&state, id, sub.reset_password, sub.form, sub.photo).await?;
    Ok(Json(details))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::delete_user(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn restore_user(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::restore_user(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, body))]
pub async fn bulk_delete(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<IdsRequest>,
) -> AppResult<Json<BulkResult>> {
    let affected = services::delete_users(&state, body.ids).await?;
    Ok(Json(BulkResult { affected }))
}

#[instrument(skip(state))]
pub async fn export_all(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(q): Query<ListQuery>,
) -> AppResult<ExportFile> {
    services::export_users(&state, q.export_filter()).await
}

#[instrument(skip(state, body))]
pub async fn export_selected(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<IdsRequest>,
) -> AppResult<ExportFile> {
    services::export_selected(&state, body.ids).await
}

#[instrument(skip(state))]
pub async fn impersonate(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AuthResponse>> {
    Ok(Json(services::impersonate(&state, auth, id).await?))
}

/// 307 to a presigned URL of the photo, or to the placeholder image.
#[instrument(skip(state))]
pub async fn photo(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Redirect> {
    let url = services::photo_location(&state, id).await?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state))]
pub async fn list_roles(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(services::list_roles(&state).await?))
}
