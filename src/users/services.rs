use std::collections::BTreeSet;

use anyhow::Context;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{FormValues, FormView, ListQuery, Page, UserDetails, UserListItem};
use super::export::{self, ExportFile};
use super::form::{self, Intent, UserForm, ValidatedForm};
use super::password::hash_password;
use super::photo::{self, CheckedPhoto, PhotoUpload};
use super::repo_types::{NewUser, Role, UserChanges, UserFilter};
use super::schema::form_schema;
use crate::auth::{extractors::AuthUser, jwt::JwtKeys, AuthResponse, PublicUser};
use crate::error::{AppError, AppResult, FieldErrors};
use crate::state::AppState;

/// Runs every check of a submission and reports all failures together.
async fn check_submission(
    st: &AppState,
    intent: Intent,
    form: UserForm,
    upload: Option<PhotoUpload>,
) -> AppResult<(ValidatedForm, Option<CheckedPhoto>)> {
    let mut errors = FieldErrors::new();

    let validated = match form::validate(intent, form, &st.config.password_rules) {
        Ok(v) => Some(v),
        Err(e) => {
            errors.extend(e);
            None
        }
    };

    let photo = match upload.map(|u| photo::check(u, &st.config.photo)).transpose() {
        Ok(p) => p,
        Err(message) => {
            errors.add("photo", message);
            None
        }
    };

    if let Some(v) = &validated {
        let known = st.users.existing_role_ids(&v.role_ids).await?;
        if known.len() != v.role_ids.len() {
            errors.add("role_ids", "The selected roles are invalid.");
        }
    }

    match validated {
        Some(v) if errors.is_empty() => Ok((v, photo)),
        _ => Err(AppError::Validation(errors)),
    }
}

async fn store_photo(st: &AppState, photo: Option<CheckedPhoto>) -> anyhow::Result<Option<String>> {
    match photo {
        Some(p) => Ok(Some(
            photo::store(st.storage.as_ref(), &st.config.photo.directory, p).await?,
        )),
        None => Ok(None),
    }
}

pub async fn create_user(
    st: &AppState,
    form: UserForm,
    upload: Option<PhotoUpload>,
) -> AppResult<UserDetails> {
    let (validated, photo) = check_submission(st, Intent::Create, form, upload).await?;
    let prepared = validated.into_prepared()?;
    let Some(password_hash) = prepared.password.into_hash() else {
        return Err(anyhow::anyhow!("create produced no password hash").into());
    };

    let photo_key = store_photo(st, photo).await?;
    let new = NewUser {
        name: prepared.name,
        email: prepared.email,
        telp: prepared.telp,
        address: prepared.address,
        photo: photo_key.clone(),
        password_hash,
        role_ids: prepared.role_ids,
    };

    let record = match st.users.create(new).await {
        Ok(r) => r,
        Err(e) => {
            if let Some(key) = &photo_key {
                photo::discard(st.storage.as_ref(), key).await;
            }
            return Err(e.into());
        }
    };

    info!(user_id = %record.user.id, roles = record.roles.len(), "user created");
    Ok(UserDetails::project(record, &st.config.photo.placeholder_url))
}

pub async fn update_user(
    st: &AppState,
    id: Uuid,
    reset_password: bool,
    form: UserForm,
    upload: Option<PhotoUpload>,
) -> AppResult<UserDetails> {
    let existing = st.users.find(id, false).await?.ok_or(AppError::NotFound)?;

    let intent = Intent::Edit { reset_password };
    let (validated, photo) = check_submission(st, intent, form, upload).await?;
    let prepared = validated.into_prepared()?;
    let password_hash = prepared.password.into_hash();
    let password_changed = password_hash.is_some();

    let photo_key = store_photo(st, photo).await?;
    let changes = UserChanges {
        name: prepared.name,
        email: prepared.email,
        telp: prepared.telp,
        address: prepared.address,
        photo: photo_key.clone(),
        password_hash,
        role_ids: prepared.role_ids,
    };

    let updated = st.users.update(id, changes).await;
    let record = match updated {
        Ok(Some(r)) => r,
        other => {
            if let Some(key) = &photo_key {
                photo::discard(st.storage.as_ref(), key).await;
            }
            return Err(match other {
                Err(e) => e.into(),
                _ => AppError::NotFound,
            });
        }
    };

    // the previous avatar is only dropped once the new reference is committed
    if let (Some(new_key), Some(old_key)) = (&photo_key, &existing.user.photo) {
        if new_key != old_key {
            photo::discard(st.storage.as_ref(), old_key).await;
        }
    }

    info!(
        user_id = %id,
        password_reset = password_changed,
        photo_replaced = photo_key.is_some(),
        "user updated"
    );
    Ok(UserDetails::project(record, &st.config.photo.placeholder_url))
}

pub async fn get_user(st: &AppState, id: Uuid) -> AppResult<UserDetails> {
    let record = st.users.find(id, true).await?.ok_or(AppError::NotFound)?;
    Ok(UserDetails::project(record, &st.config.photo.placeholder_url))
}

pub async fn list_users(st: &AppState, query: &ListQuery) -> AppResult<Page<UserListItem>> {
    let filter = query.page_filter();
    let (records, total) = st.users.list(&filter).await?;
    let placeholder = &st.config.photo.placeholder_url;
    Ok(Page {
        items: records
            .into_iter()
            .map(|r| UserListItem::project(r, placeholder))
            .collect(),
        total,
        limit: filter.limit.unwrap_or(total),
        offset: filter.offset,
    })
}

pub async fn create_form(st: &AppState) -> AppResult<FormView> {
    let roles = st.users.roles().await?;
    Ok(FormView {
        schema: form_schema(Intent::Create, &st.config.password_rules, &roles),
        values: None,
    })
}

pub async fn edit_form(st: &AppState, id: Uuid, reset_password: bool) -> AppResult<FormView> {
    let record = st.users.find(id, false).await?.ok_or(AppError::NotFound)?;
    let roles = st.users.roles().await?;
    let mut values = FormValues::from_record(&record);
    values.reset_password = reset_password;
    Ok(FormView {
        schema: form_schema(
            Intent::Edit { reset_password },
            &st.config.password_rules,
            &roles,
        ),
        values: Some(values),
    })
}

pub async fn list_roles(st: &AppState) -> AppResult<Vec<Role>> {
    Ok(st.users.roles().await?)
}

pub async fn delete_user(st: &AppState, id: Uuid) -> AppResult<()> {
    match st.users.soft_delete(&[id]).await? {
        0 => Err(AppError::NotFound),
        _ => {
            info!(user_id = %id, "user soft deleted");
            Ok(())
        }
    }
}

pub async fn restore_user(st: &AppState, id: Uuid) -> AppResult<()> {
    match st.users.restore(&[id]).await? {
        0 => Err(AppError::NotFound),
        _ => {
            info!(user_id = %id, "user restored");
            Ok(())
        }
    }
}

fn selection(ids: Vec<Uuid>) -> AppResult<Vec<Uuid>> {
    let ids: Vec<Uuid> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    if ids.is_empty() {
        return Err(AppError::BadRequest("No records selected".into()));
    }
    Ok(ids)
}

pub async fn delete_users(st: &AppState, ids: Vec<Uuid>) -> AppResult<u64> {
    let ids = selection(ids)?;
    let affected = st.users.soft_delete(&ids).await?;
    info!(selected = ids.len(), affected, "bulk soft delete");
    Ok(affected)
}

pub async fn export_users(st: &AppState, filter: UserFilter) -> AppResult<ExportFile> {
    let (records, _) = st.users.list(&filter).await?;
    let users: Vec<_> = records.into_iter().map(|r| r.user).collect();
    let file = export::export(&users)?;
    info!(rows = file.rows, "users exported");
    Ok(file)
}

pub async fn export_selected(st: &AppState, ids: Vec<Uuid>) -> AppResult<ExportFile> {
    let filter = UserFilter {
        ids: Some(selection(ids)?),
        ..Default::default()
    };
    export_users(st, filter).await
}

/// Starts a session acting as `target` on behalf of `operator`.
pub async fn impersonate(st: &AppState, operator: AuthUser, target: Uuid) -> AppResult<AuthResponse> {
    if operator.impersonator.is_some() {
        return Err(AppError::Forbidden("Already impersonating a user".into()));
    }
    if operator.user_id == target {
        return Err(AppError::Forbidden("Cannot impersonate yourself".into()));
    }
    let record = st.users.find(target, false).await?.ok_or(AppError::NotFound)?;

    let keys = JwtKeys::from(&st.config.jwt);
    let pair = keys.issue_pair(target, Some(operator.user_id))?;

    info!(operator = %operator.user_id, target = %target, "impersonation started");
    Ok(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user: PublicUser::from(&record.user),
        impersonator: Some(operator.user_id),
    })
}

/// Where the photo of `id` can be fetched: a presigned object URL or the placeholder.
pub async fn photo_location(st: &AppState, id: Uuid) -> AppResult<String> {
    let record = st.users.find(id, true).await?.ok_or(AppError::NotFound)?;
    match record.user.photo.filter(|p| !p.is_empty()) {
        Some(key) => Ok(st
            .storage
            .presign_get(&key, st.config.photo.presign_ttl_secs)
            .await
            .with_context(|| format!("presign url for {}", key))?),
        None => Ok(st.config.photo.placeholder_url.clone()),
    }
}

/// Creates the configured operator account unless an active user already has its email.
pub async fn bootstrap_admin(st: &AppState) -> anyhow::Result<()> {
    let Some(admin) = st.config.bootstrap_admin.clone() else {
        return Ok(());
    };
    let email = admin.email.trim().to_lowercase();
    if st.users.find_by_email(&email).await?.is_some() {
        return Ok(());
    }
    if !form::is_valid_email(&email) {
        warn!(email = %email, "ADMIN_EMAIL is not a valid email; skipping bootstrap");
        return Ok(());
    }

    let record = st
        .users
        .create(NewUser {
            name: admin.name,
            email,
            telp: None,
            address: None,
            photo: None,
            password_hash: hash_password(&admin.password)?,
            role_ids: BTreeSet::new(),
        })
        .await
        .context("create bootstrap admin")?;
    info!(user_id = %record.user.id, "bootstrap admin created");
    Ok(())
}
