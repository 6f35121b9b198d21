use std::collections::{HashMap, HashSet};

use axum::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    Comment, EditState, Media, NewMedia, NewUser, Page, Post, SortOrder, Store, StoreError,
    StoreResult, User, UserChanges, MAX_MEDIA_PER_POST,
};
use crate::public_id::PublicId;

trait Record: Clone {
    fn public_id(&self) -> PublicId;
    fn created(&self) -> OffsetDateTime;
    fn updated(&self) -> OffsetDateTime;
    fn id(&self) -> i64;
}

macro_rules! impl_record {
    ($($ty:ty),*) => {$(
        impl Record for $ty {
            fn public_id(&self) -> PublicId { self.public_id }
            fn created(&self) -> OffsetDateTime { self.created }
            fn updated(&self) -> OffsetDateTime { self.updated }
            fn id(&self) -> i64 { self.id }
        }
    )*};
}

impl_record!(User, Post, Media, Comment);

/// Slot arena keyed by position, with a side index from public id to slot.
/// Slot `n` holds the record with id `n + 1`; freed slots are never reused.
struct Arena<T> {
    slots: Vec<Option<T>>,
    by_public: HashMap<PublicId, usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            by_public: HashMap::new(),
        }
    }
}

impl<T: Record> Arena<T> {
    fn insert(&mut self, build: impl FnOnce(i64, PublicId) -> T) -> T {
        let slot = self.slots.len();
        let mut public_id = PublicId::generate();
        while self.by_public.contains_key(&public_id) {
            public_id = PublicId::generate();
        }
        let record = build(slot as i64 + 1, public_id);
        self.by_public.insert(public_id, slot);
        self.slots.push(Some(record.clone()));
        record
    }

    fn slot(id: i64) -> Option<usize> {
        usize::try_from(id).ok()?.checked_sub(1)
    }

    fn get(&self, id: i64) -> Option<&T> {
        self.slots.get(Self::slot(id)?)?.as_ref()
    }

    fn get_mut(&mut self, id: i64) -> Option<&mut T> {
        self.slots.get_mut(Self::slot(id)?)?.as_mut()
    }

    fn by_public(&self, public_id: PublicId) -> Option<&T> {
        let slot = *self.by_public.get(&public_id)?;
        self.slots.get(slot)?.as_ref()
    }

    fn remove(&mut self, id: i64) -> Option<T> {
        let record = self.slots.get_mut(Self::slot(id)?)?.take()?;
        self.by_public.remove(&record.public_id());
        Some(record)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }
}

fn paginate<T: Record>(mut rows: Vec<T>, page: Page) -> Vec<T> {
    rows.sort_by(|a, b| match page.order {
        SortOrder::Created => (a.created(), a.id()).cmp(&(b.created(), b.id())),
        SortOrder::CreatedDesc => (b.created(), b.id()).cmp(&(a.created(), a.id())),
        SortOrder::Updated => (a.updated(), a.id()).cmp(&(b.updated(), b.id())),
        SortOrder::UpdatedDesc => (b.updated(), b.id()).cmp(&(a.updated(), a.id())),
    });
    rows.into_iter()
        .skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

#[derive(Default)]
struct Tables {
    users: Arena<User>,
    posts: Arena<Post>,
    media: Arena<Media>,
    comments: Arena<Comment>,
    likes: HashSet<(i64, i64)>,
}

impl Tables {
    fn ensure_unique(&self, except: Option<i64>, username: &str, email: &str) -> StoreResult<()> {
        for user in self.users.iter().filter(|u| Some(u.id) != except) {
            if user.username == username {
                return Err(StoreError::Duplicate { field: "username" });
            }
            if user.email == email {
                return Err(StoreError::Duplicate { field: "email" });
            }
        }
        Ok(())
    }

    fn post_has_comments(&self, post_id: i64) -> bool {
        self.comments.iter().any(|c| c.post_id == post_id)
    }

    fn remove_post(&mut self, post_id: i64) {
        let media: Vec<i64> = self
            .media
            .iter()
            .filter(|m| m.post_id == post_id)
            .map(|m| m.id)
            .collect();
        for id in media {
            self.media.remove(id);
        }
        self.likes.retain(|(_, p)| *p != post_id);
        self.posts.remove(post_id);
    }
}

/// In-process store used for local runs without Postgres and in tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, new: NewUser) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        t.ensure_unique(None, &new.username, &new.email)?;
        let now = OffsetDateTime::now_utc();
        Ok(t.users.insert(|id, public_id| User {
            id,
            public_id,
            username: new.username,
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            password_hash: new.password_hash,
            is_active: true,
            is_superuser: new.is_superuser,
            is_staff: new.is_staff,
            bio: new.bio,
            avatar: new.avatar,
            last_login: None,
            created: now,
            updated: now,
        }))
    }

    async fn user_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn user_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.by_public(public_id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.read().await;
        let found = t.users.iter().find(|u| u.email == email).cloned();
        Ok(found)
    }

    async fn list_users(&self, include_superusers: bool, page: Page) -> StoreResult<Vec<User>> {
        let t = self.tables.read().await;
        let rows = t
            .users
            .iter()
            .filter(|u| include_superusers || !u.is_superuser)
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> StoreResult<User> {
        let mut t = self.tables.write().await;
        let current = t.users.get(id).cloned().ok_or(StoreError::NotFound)?;
        let username = changes.username.unwrap_or(current.username);
        let email = changes.email.unwrap_or(current.email);
        t.ensure_unique(Some(id), &username, &email)?;

        let user = t.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.username = username;
        user.email = email;
        if let Some(v) = changes.first_name {
            user.first_name = v;
        }
        if let Some(v) = changes.last_name {
            user.last_name = v;
        }
        if let Some(v) = changes.bio {
            user.bio = Some(v);
        }
        if let Some(v) = changes.avatar {
            user.avatar = Some(v);
        }
        user.updated = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn touch_last_login(&self, id: i64, at: OffsetDateTime) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        let user = t.users.get_mut(id).ok_or(StoreError::NotFound)?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.users.get(id).is_none() {
            return Err(StoreError::NotFound);
        }
        if t.comments.iter().any(|c| c.author_id == id) {
            return Err(StoreError::Restricted("comments"));
        }
        let posts: Vec<i64> = t
            .posts
            .iter()
            .filter(|p| p.author_id == id)
            .map(|p| p.id)
            .collect();
        if posts.iter().any(|p| t.post_has_comments(*p)) {
            return Err(StoreError::Restricted("comments"));
        }
        for post_id in posts {
            t.remove_post(post_id);
        }
        t.likes.retain(|(u, _)| *u != id);
        t.users.remove(id);
        Ok(())
    }

    async fn insert_post(
        &self,
        author_id: i64,
        body: &str,
        media: Vec<NewMedia>,
    ) -> StoreResult<(Post, Vec<Media>)> {
        if media.len() > MAX_MEDIA_PER_POST {
            return Err(StoreError::LimitExceeded {
                field: "media",
                max: MAX_MEDIA_PER_POST,
            });
        }
        let mut t = self.tables.write().await;
        if t.users.get(author_id).is_none() {
            return Err(StoreError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        let post = t.posts.insert(|id, public_id| Post {
            id,
            public_id,
            author_id,
            body: body.to_string(),
            edited: EditState::Original,
            created: now,
            updated: now,
        });
        let attached = media
            .into_iter()
            .map(|m| {
                t.media.insert(|id, public_id| Media {
                    id,
                    public_id,
                    post_id: post.id,
                    file_key: m.file_key,
                    file_name: m.file_name,
                    is_video: m.is_video,
                    size: m.size,
                    created: now,
                    updated: now,
                })
            })
            .collect();
        Ok((post, attached))
    }

    async fn post_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Post>> {
        Ok(self.tables.read().await.posts.by_public(public_id).cloned())
    }

    async fn list_posts(&self, page: Page) -> StoreResult<Vec<Post>> {
        let t = self.tables.read().await;
        Ok(paginate(t.posts.iter().cloned().collect(), page))
    }

    async fn update_post(&self, post: &Post) -> StoreResult<Post> {
        let mut t = self.tables.write().await;
        let stored = t.posts.get_mut(post.id).ok_or(StoreError::NotFound)?;
        stored.body = post.body.clone();
        if post.edited.is_edited() {
            stored.edited = EditState::Edited;
        }
        stored.updated = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }

    async fn delete_post(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.posts.get(id).is_none() {
            return Err(StoreError::NotFound);
        }
        if t.post_has_comments(id) {
            return Err(StoreError::Restricted("comments"));
        }
        t.remove_post(id);
        Ok(())
    }

    async fn media_for_post(&self, post_id: i64) -> StoreResult<Vec<Media>> {
        let t = self.tables.read().await;
        Ok(t.media.iter().filter(|m| m.post_id == post_id).cloned().collect())
    }

    async fn set_like(&self, user_id: i64, post_id: i64, liked: bool) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        if t.posts.get(post_id).is_none() || t.users.get(user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        if liked {
            t.likes.insert((user_id, post_id));
        } else {
            t.likes.remove(&(user_id, post_id));
        }
        Ok(())
    }

    async fn like_state(&self, post_id: i64, user_id: Option<i64>) -> StoreResult<(i64, bool)> {
        let t = self.tables.read().await;
        let count = t.likes.iter().filter(|(_, p)| *p == post_id).count() as i64;
        let liked = user_id.is_some_and(|u| t.likes.contains(&(u, post_id)));
        Ok((count, liked))
    }

    async fn insert_comment(&self, post_id: i64, author_id: i64, body: &str) -> StoreResult<Comment> {
        let mut t = self.tables.write().await;
        if t.posts.get(post_id).is_none() || t.users.get(author_id).is_none() {
            return Err(StoreError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        Ok(t.comments.insert(|id, public_id| Comment {
            id,
            public_id,
            post_id,
            author_id,
            body: body.to_string(),
            edited: EditState::Original,
            created: now,
            updated: now,
        }))
    }

    async fn comment_by_public_id(&self, public_id: PublicId) -> StoreResult<Option<Comment>> {
        Ok(self.tables.read().await.comments.by_public(public_id).cloned())
    }

    async fn list_comments(&self, post_id: i64, page: Page) -> StoreResult<Vec<Comment>> {
        let t = self.tables.read().await;
        let rows = t
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn update_comment(&self, comment: &Comment) -> StoreResult<Comment> {
        let mut t = self.tables.write().await;
        let stored = t.comments.get_mut(comment.id).ok_or(StoreError::NotFound)?;
        stored.body = comment.body.clone();
        if comment.edited.is_edited() {
            stored.edited = EditState::Edited;
        }
        stored.updated = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }

    async fn delete_comment(&self, id: i64) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.comments.remove(id).map(|_| ()).ok_or(StoreError::NotFound)
    }
}
