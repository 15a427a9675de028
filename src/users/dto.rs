use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::photo::resolve_photo;
use super::repo_types::{Role, SortDirection, SortField, Trashed, UserFilter, UserWithRoles};
use super::schema::FieldSpec;

const MAX_PAGE_SIZE: i64 = 100;

/// Row of the users table.
#[derive(Debug, Serialize)]
pub struct UserListItem {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub roles: Vec<String>,
    pub photo: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl UserListItem {
    pub fn project(record: UserWithRoles, placeholder: &str) -> Self {
        let UserWithRoles { user, roles } = record;
        Self {
            photo: resolve_photo(user.photo.as_deref(), placeholder),
            id: user.id,
            name: user.name,
            email: user.email,
            telp: user.telp,
            address: user.address,
            roles: roles.into_iter().map(|r| r.name).collect(),
            created_at: user.created_at,
            deleted_at: user.deleted_at,
        }
    }
}

/// Read-only detail view of a single user.
#[derive(Debug, Serialize)]
pub struct UserDetails {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub roles: Vec<Role>,
    pub photo: String,
    pub has_photo: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl UserDetails {
    pub fn project(record: UserWithRoles, placeholder: &str) -> Self {
        let UserWithRoles { user, roles } = record;
        Self {
            photo: resolve_photo(user.photo.as_deref(), placeholder),
            has_photo: user.photo.as_deref().is_some_and(|p| !p.is_empty()),
            id: user.id,
            name: user.name,
            email: user.email,
            telp: user.telp,
            address: user.address,
            roles,
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(default)]
    pub trashed: Trashed,
    #[serde(default)]
    pub sort: SortField,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

impl ListQuery {
    pub fn page_filter(&self) -> UserFilter {
        UserFilter {
            limit: Some(self.limit.clamp(1, MAX_PAGE_SIZE)),
            offset: self.offset.max(0),
            ..self.export_filter()
        }
    }

    /// Same selection as the list, without pagination.
    pub fn export_filter(&self) -> UserFilter {
        UserFilter {
            search: self.search.clone(),
            trashed: self.trashed,
            ids: None,
            sort: self.sort,
            direction: self.direction,
            limit: None,
            offset: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkResult {
    pub affected: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SchemaQuery {
    #[serde(default)]
    pub reset_password: bool,
}

#[derive(Debug, Serialize)]
pub struct FormView {
    pub schema: Vec<FieldSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<FormValues>,
}

/// Current values pre-filled into the edit form. Never carries the password.
#[derive(Debug, Serialize)]
pub struct FormValues {
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub photo: Option<String>,
    pub role_ids: Vec<Uuid>,
    pub reset_password: bool,
}

impl FormValues {
    pub fn from_record(record: &UserWithRoles) -> Self {
        Self {
            name: record.user.name.clone(),
            email: record.user.email.clone(),
            telp: record.user.telp.clone(),
            address: record.user.address.clone(),
            photo: record.user.photo.clone(),
            role_ids: record.roles.iter().map(|r| r.id).collect(),
            reset_password: false,
        }
    }
}
