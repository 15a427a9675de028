use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::UserRepository;
use super::repo_types::{
    NewUser, Role, SortDirection, SortField, Trashed, User, UserChanges, UserFilter, UserWithRoles,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    roles: BTreeMap<Uuid, Role>,
    role_user: BTreeSet<(Uuid, Uuid)>,
}

/// In-process stand-in for the Postgres repository.
#[derive(Default)]
pub struct MemoryUserRepository {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryUserRepository {
    pub fn add_role(&self, name: &str) -> Role {
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.inner
            .lock()
            .unwrap()
            .roles
            .insert(role.id, role.clone());
        role
    }

    /// Makes every following create/update fail like a storage error would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn role_links(&self, user_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .role_user
            .iter()
            .filter(|(u, _)| *u == user_id)
            .count()
    }

    pub fn stored(&self, id: Uuid) -> Option<User> {
        self.inner.lock().unwrap().users.get(&id).cloned()
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated storage failure");
        }
        Ok(())
    }
}

impl Inner {
    fn with_roles(&self, user: User) -> UserWithRoles {
        let mut roles: Vec<Role> = self
            .role_user
            .iter()
            .filter(|(u, _)| *u == user.id)
            .filter_map(|(_, r)| self.roles.get(r).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        UserWithRoles { user, roles }
    }

    fn sync_roles(&mut self, user_id: Uuid, role_ids: &BTreeSet<Uuid>) {
        self.role_user
            .retain(|(u, r)| *u != user_id || role_ids.contains(r));
        for role_id in role_ids {
            self.role_user.insert((user_id, *role_id));
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, new: NewUser) -> anyhow::Result<UserWithRoles> {
        self.check_writable()?;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            telp: new.telp,
            address: new.address,
            photo: new.photo,
            password_hash: new.password_hash,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.users.insert(user.id, user.clone());
        inner.sync_roles(user.id, &new.role_ids);
        Ok(inner.with_roles(user))
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> anyhow::Result<Option<UserWithRoles>> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(user) = inner
            .users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
        else {
            return Ok(None);
        };
        user.name = changes.name;
        user.email = changes.email;
        user.telp = changes.telp;
        user.address = changes.address;
        if let Some(photo) = changes.photo {
            user.photo = Some(photo);
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = OffsetDateTime::now_utc();
        let user = user.clone();
        inner.sync_roles(id, &changes.role_ids);
        Ok(Some(inner.with_roles(user)))
    }

    async fn find(&self, id: Uuid, with_trashed: bool) -> anyhow::Result<Option<UserWithRoles>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .get(&id)
            .filter(|u| with_trashed || u.deleted_at.is_none())
            .cloned()
            .map(|u| inner.with_roles(u)))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .values()
            .filter(|u| u.deleted_at.is_none() && u.email.eq_ignore_ascii_case(email))
            .min_by_key(|u| u.created_at)
            .cloned())
    }

    async fn list(&self, filter: &UserFilter) -> anyhow::Result<(Vec<UserWithRoles>, i64)> {
        let inner = self.inner.lock().unwrap();
        let search = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| match filter.trashed {
                Trashed::Without => u.deleted_at.is_none(),
                Trashed::Only => u.deleted_at.is_some(),
                Trashed::With => true,
            })
            .filter(|u| match &search {
                Some(s) => u.name.to_lowercase().contains(s) || u.email.to_lowercase().contains(s),
                None => true,
            })
            .filter(|u| match &filter.ids {
                Some(ids) => ids.contains(&u.id),
                None => true,
            })
            .cloned()
            .collect();

        users.sort_by(|a, b| {
            let ord = match filter.sort {
                SortField::Name => a.name.cmp(&b.name),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let ord = match filter.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            ord.then(a.id.cmp(&b.id))
        });

        let total = users.len() as i64;
        let page = users
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.map_or(usize::MAX, |l| l.max(0) as usize))
            .map(|u| inner.with_roles(u))
            .collect();
        Ok((page, total))
    }

    async fn soft_delete(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let mut affected = 0;
        for id in ids {
            if let Some(user) = inner.users.get_mut(id).filter(|u| u.deleted_at.is_none()) {
                user.deleted_at = Some(now);
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn restore(&self, ids: &[Uuid]) -> anyhow::Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut affected = 0;
        for id in ids {
            if let Some(user) = inner.users.get_mut(id).filter(|u| u.deleted_at.is_some()) {
                user.deleted_at = None;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn roles(&self) -> anyhow::Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.inner.lock().unwrap().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn existing_role_ids(&self, ids: &BTreeSet<Uuid>) -> anyhow::Result<BTreeSet<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| inner.roles.contains_key(id))
            .copied()
            .collect())
    }
}
