use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub photo: Option<String>, // storage key, None → placeholder
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>, // soft delete marker
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct UserWithRoles {
    pub user: User,
    pub roles: Vec<Role>, // sorted by name
}

pub struct NewUser {
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub photo: Option<String>,
    pub password_hash: String,
    pub role_ids: BTreeSet<Uuid>,
}

/// Full replacement of the editable columns. `photo` and `password_hash`
/// are left untouched when `None`.
pub struct UserChanges {
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub photo: Option<String>,
    pub password_hash: Option<String>,
    pub role_ids: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trashed {
    #[default]
    Without,
    With,
    Only,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub trashed: Trashed,
    pub ids: Option<Vec<Uuid>>,
    pub sort: SortField,
    pub direction: SortDirection,
    pub limit: Option<i64>,
    pub offset: i64,
}
