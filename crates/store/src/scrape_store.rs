use crate::json_store::{JsonStore, StoreError};
use coinpulse_core::Post;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// The scraped-posts document.
///
/// Append-mode with a `(source, link)` dedup merge: a duplicate never adds
/// a second entry, but a newer duplicate may upgrade the existing record's
/// empty `token_symbol` or `comments`.
pub struct ScrapeStore {
    inner: JsonStore<Post>,
}

impl ScrapeStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: JsonStore::new(path),
        }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        self.inner.path()
    }

    /// Reads the full document with the standard read-retry.
    ///
    /// # Errors
    ///
    /// Fails when the document stays unreadable through the retries.
    pub async fn load(&self) -> Result<Vec<Post>, StoreError> {
        self.inner.read().await
    }

    /// Appends one post under the store lock. Returns `true` when the post
    /// was new, `false` when it merged into an existing `(source, link)`
    /// entry.
    ///
    /// # Errors
    ///
    /// Fails if the current document cannot be read or the commit fails.
    pub async fn append(&self, post: Post) -> Result<bool, StoreError> {
        self.inner
            .update(move |mut posts| {
                let inserted = merge_post(&mut posts, post);
                (posts, inserted)
            })
            .await
    }

    /// Appends a post, drawing its id from the shared counter inside the
    /// store lock. Only a genuinely new `(source, link)` consumes an id, and
    /// because assignment and append share one critical section, ids are
    /// strictly increasing in append order across concurrent workers.
    ///
    /// Returns the assigned id, or `None` when the post merged into an
    /// existing entry.
    ///
    /// # Errors
    ///
    /// Fails if the current document cannot be read or the commit fails.
    pub async fn append_assigning_id(
        &self,
        mut post: Post,
        ids: &AtomicU64,
    ) -> Result<Option<u64>, StoreError> {
        self.inner
            .update(move |mut posts| {
                if let Some(existing) = posts
                    .iter_mut()
                    .find(|p| p.source == post.source && p.link == post.link)
                {
                    if existing.token_symbol.is_none() && post.token_symbol.is_some() {
                        existing.token_symbol = post.token_symbol.take();
                    }
                    if existing.comments.is_empty() && !post.comments.is_empty() {
                        existing.comments = std::mem::take(&mut post.comments);
                    }
                    (posts, None)
                } else {
                    let id = ids.fetch_add(1, Ordering::SeqCst) + 1;
                    post.id = id;
                    posts.push(post);
                    (posts, Some(id))
                }
            })
            .await
    }

    /// Read-modify-write of the post with the given id, used by the token
    /// resolver to attach a symbol after the fact. Returns `false` when no
    /// post has that id.
    ///
    /// # Errors
    ///
    /// Fails if the current document cannot be read or the commit fails.
    pub async fn update_post<F>(&self, id: u64, mutate: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Post),
    {
        self.inner
            .update(move |mut posts| {
                let found = match posts.iter_mut().find(|p| p.id == id) {
                    Some(post) => {
                        mutate(post);
                        true
                    }
                    None => false,
                };
                (posts, found)
            })
            .await
    }

    /// Overwrites the document with an empty array (the scraper-start side
    /// effect).
    ///
    /// # Errors
    ///
    /// Fails if the commit fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.inner.replace(&[]).await
    }

    /// Largest post id currently in the store, for seeding the monotonic
    /// id counter across runs.
    ///
    /// # Errors
    ///
    /// Fails when the document stays unreadable through the retries.
    pub async fn max_id(&self) -> Result<u64, StoreError> {
        let posts = self.load().await?;
        Ok(posts.iter().map(|p| p.id).max().unwrap_or(0))
    }
}

/// The store's merge rule, exposed for direct testing: dedupe by
/// `(source, link)`, upgrading the existing record's empty symbol/comments
/// from the newer one. Returns `true` when a new entry was inserted.
pub fn merge_post(posts: &mut Vec<Post>, incoming: Post) -> bool {
    if let Some(existing) = posts
        .iter_mut()
        .find(|p| p.source == incoming.source && p.link == incoming.link)
    {
        if existing.token_symbol.is_none() && incoming.token_symbol.is_some() {
            existing.token_symbol = incoming.token_symbol;
        }
        if existing.comments.is_empty() && !incoming.comments.is_empty() {
            existing.comments = incoming.comments;
        }
        false
    } else {
        posts.push(incoming);
        true
    }
}

/// In-memory set of `(source, link)` keys already scraped, seeded from the
/// store at startup and grown as workers emit posts. The duplicate check
/// and insert are one atomic operation.
#[derive(Default)]
pub struct SeenSet {
    keys: Mutex<HashSet<(String, String)>>,
}

impl SeenSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn seeded_from(posts: &[Post]) -> Self {
        let keys = posts.iter().map(Post::key).collect();
        Self {
            keys: Mutex::new(keys),
        }
    }

    /// Inserts the key, returning `true` when it was not seen before.
    pub fn insert(&self, source: &str, link: &str) -> bool {
        self.keys
            .lock()
            .expect("seen-set lock poisoned")
            .insert((source.to_string(), link.to_string()))
    }

    #[must_use]
    pub fn contains(&self, source: &str, link: &str) -> bool {
        self.keys
            .lock()
            .expect("seen-set lock poisoned")
            .contains(&(source.to_string(), link.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.lock().expect("seen-set lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
