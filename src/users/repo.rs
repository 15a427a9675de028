use std::collections::{BTreeSet, HashMap};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::repo_types::{
    NewUser, Role, SortDirection, SortField, Trashed, User, UserChanges, UserFilter, UserWithRoles,
};

/// Persistence seam for user records and their role associations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, new: NewUser) -> anyhow::Result<UserWithRoles>;
    /// `None` when no active user has this id.
    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<UserWithRoles>>;
    async fn find(&self, id: Uuid, with_trashed: bool) -> anyhow::Result<Option<UserWithRoles>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Matching page plus the total count before pagination.
    async fn list(&self, filter: &UserFilter) -> anyhow::Result<(Vec<UserWithRoles>, i64)>;
    async fn soft_delete(&self, ids: &[Uuid]) -> anyhow::Result<u64>;
    async fn restore(&self, ids: &[Uuid]) -> anyhow::Result<u64>;
    async fn roles(&self) -> anyhow::Result<Vec<Role>>;
    async fn existing_role_ids(&self, ids: &BTreeSet<Uuid>) -> anyhow::Result<BTreeSet<Uuid>>;
}

const USER_COLUMNS: &str =
    "id, name, email, telp, address, photo, password_hash, created_at, updated_at, deleted_at";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Makes the user's role rows equal to `role_ids`. Re-syncing the same set is a no-op.
async fn sync_roles_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    role_ids: &BTreeSet<Uuid>,
) -> anyhow::Result<()> {
    let ids: Vec<Uuid> = role_ids.iter().copied().collect();

    sqlx::query("DELETE FROM role_user WHERE user_id = $1 AND NOT (role_id = ANY($2))")
        .bind(user_id)
        .bind(&ids[..])
        .execute(&mut **tx)
        .await
        .context("prune role_user")?;

    sqlx::query(
        r#"
        INSERT INTO role_user (user_id, role_id)
        SELECT $1, UNNEST($2::uuid[])
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(&ids[..])
    .execute(&mut **tx)
    .await
    .context("insert role_user")?;

    Ok(())
}

async fn roles_for_users(
    db: &PgPool,
    user_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Vec<Role>>> {
    let rows = sqlx::query_as::<_, (Uuid, Uuid, String)>(
        r#"
        SELECT ru.user_id, r.id, r.name
          FROM role_user ru
          JOIN roles r ON r.id = ru.role_id
         WHERE ru.user_id = ANY($1)
         ORDER BY r.name ASC
        "#,
    )
    .bind(user_ids)
    .fetch_all(db)
    .await
    .context("load roles for users")?;

    let mut out: HashMap<Uuid, Vec<Role>> = HashMap::new();
    for (user_id, id, name) in rows {
        out.entry(user_id).or_default().push(Role { id, name });
    }
    Ok(out)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    match filter.trashed {
        Trashed::Without => {
            qb.push(" AND deleted_at IS NULL");
        }
        Trashed::Only => {
            qb.push(" AND deleted_at IS NOT NULL");
        }
        Trashed::With => {}
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(ids) = &filter.ids {
        qb.push(" AND id = ANY(").push_bind(ids.clone()).push(")");
    }
}

impl PgUserRepository {
    async fn attach_roles(&self, users: Vec<User>) -> anyhow::Result<Vec<UserWithRoles>> {
        let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
        let mut roles = roles_for_users(&self.db, &ids).await?;
        Ok(users
            .into_iter()
            .map(|user| {
                let roles = roles.remove(&user.id).unwrap_or_default();
                UserWithRoles { user, roles }
            })
            .collect())
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, new: NewUser) -> anyhow::Result<UserWithRoles> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, telp, address, photo, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.telp)
        .bind(&new.address)
        .bind(&new.photo)
        .bind(&new.password_hash)
        .fetch_one(&mut *tx)
        .await
        .context("insert user")?;

        sync_roles_tx(&mut tx, user.id, &new.role_ids).await?;
        tx.commit().await.context("commit tx")?;

        let mut out = self.attach_roles(vec![user]).await?;
        out.pop().context("created user vanished")
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<UserWithRoles>> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = $2,
                   email = $3,
                   telp = $4,
                   address = $5,
                   photo = COALESCE($6, photo),
                   password_hash = COALESCE($7, password_hash),
                   updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.email)
        .bind(&changes.telp)
        .bind(&changes.address)
        .bind(&changes.photo)
        .bind(&changes.password_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("update user")?;

        let Some(user) = user else {
            return Ok(None);
        };

        sync_roles_tx(&mut tx, user.id, &changes.role_ids).await?;
        tx.commit().await.context("commit tx")?;

        Ok(self.attach_roles(vec![user]).await?.pop())
    }

    async fn find(&self, id: Uuid, with_trashed: bool) -> anyhow::Result<Option<UserWithRoles>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE id = $1 AND ($2 OR deleted_at IS NULL)
            "#
        ))
        .bind(id)
        .bind(with_trashed)
        .fetch_optional(&self.db)
        .await
        .context("find user")?;

        match user {
            Some(user) => Ok(self.attach_roles(vec![user]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        // emails are not unique; the oldest active account wins
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE lower(email) = lower($1) AND deleted_at IS NULL
             ORDER BY created_at ASC
             LIMIT 1
            "#
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn list(&self, filter: &UserFilter) -> anyhow::Result<(Vec<UserWithRoles>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users WHERE TRUE");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.db)
            .await
            .context("count users")?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {USER_COLUMNS} FROM users WHERE TRUE"
        ));
        push_filters(&mut qb, filter);
        let column = match filter.sort {
            SortField::Name => "name",
            SortField::CreatedAt => "created_at",
        };
        let direction = match filter.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        qb.push(format!(" ORDER BY {} {}, id ASC", column, direction));
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }
        qb.push(" OFFSET ").push_bind(filter.offset);

        let users = qb
            .build_query_as::<User>()
            .fetch_all(&self.db)
            .await
            .context("list users")?;

        Ok((self.attach_roles(users).await?, total))
    }

    async fn soft_delete(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET deleted_at = now(), updated_at = now()
             WHERE id = ANY($1) AND deleted_at IS NULL
            "#,
        )
        .bind(ids)
        .execute(&self.db)
        .await
        .context("soft delete users")?;
        Ok(res.rows_affected())
    }

    async fn restore(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET deleted_at = NULL, updated_at = now()
             WHERE id = ANY($1) AND deleted_at IS NOT NULL
            "#,
        )
        .bind(ids)
        .execute(&self.db)
        .await
        .context("restore users")?;
        Ok(res.rows_affected())
    }

    async fn roles(&self) -> anyhow::Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT id, name FROM roles ORDER BY name ASC")
            .fetch_all(&self.db)
            .await
            .context("list roles")?;
        Ok(roles)
    }

    async fn existing_role_ids(&self, ids: &BTreeSet<Uuid>) -> anyhow::Result<BTreeSet<Uuid>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let ids: Vec<Uuid> = ids.iter().copied().collect();
        let found = sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE id = ANY($1)")
            .bind(&ids[..])
            .fetch_all(&self.db)
            .await
            .context("check role ids")?;
        Ok(found.into_iter().collect())
    }
}
