//! Per-chat conversation state
//!
//! [`SessionRegistry`] hands out one exclusive [`SessionGuard`] per chat at a
//! time. Guards for different chats never contend with each other; a second
//! acquire for the same chat waits until the first guard is dropped, so a
//! whole transition (including its storage write) is observed atomically.

use crate::models::{ChatId, Chapter, Manga};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A manga whose latest chapter is known and stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedManga {
    pub title: String,
    pub url: String,
    pub chapter: Chapter,
}

impl ResolvedManga {
    pub fn new(manga: Manga, chapter: Chapter) -> Self {
        Self {
            title: manga.title,
            url: manga.url,
            chapter,
        }
    }

    pub fn to_manga(&self) -> Manga {
        Manga::new(self.title.clone(), self.url.clone()).with_last_chapter(self.chapter.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Idle,
    /// Search results shown to the user, waiting for a title
    AwaitingSelection { candidates: Vec<Manga> },
    /// Subscribed, waiting for Download / Read Online / Do Nothing
    AwaitingAction { manga: ResolvedManga },
}

impl Session {
    pub fn is_idle(&self) -> bool {
        matches!(self, Session::Idle)
    }

    /// Leave `Idle` in place and return the previous state
    pub fn take(&mut self) -> Session {
        std::mem::take(self)
    }
}

type Slot = Arc<AsyncMutex<Session>>;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    slots: Arc<Mutex<HashMap<ChatId, Slot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, chat_id: ChatId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(slots.entry(chat_id).or_default())
    }

    /// Exclusive access to the chat's session, created Idle when absent
    pub async fn acquire(&self, chat_id: ChatId) -> SessionGuard {
        let slot = self.slot(chat_id);
        let guard = slot.lock_owned().await;
        SessionGuard {
            chat_id,
            guard,
            registry: self.clone(),
        }
    }

    /// Snapshot of the chat's session; `None` when it is Idle.
    ///
    /// Waits for an in-flight transition of the same chat to finish.
    pub async fn state(&self, chat_id: ChatId) -> Option<Session> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            slots.get(&chat_id).cloned()
        }?;
        let session = slot.lock().await;
        if session.is_idle() {
            None
        } else {
            Some(session.clone())
        }
    }

    /// Number of chats holding a slot
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the chat's slot if `held` is the only reference to it besides
    /// the map. Waiters in `acquire` hold their own clone of the slot.
    fn prune(&self, chat_id: ChatId, held: &OwnedMutexGuard<Session>) {
        if !held.is_idle() {
            return;
        }
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let unused = slots
            .get(&chat_id)
            .map(|slot| Arc::strong_count(slot) == 2 && Arc::ptr_eq(slot, OwnedMutexGuard::mutex(held)))
            .unwrap_or(false);
        if unused {
            slots.remove(&chat_id);
        }
    }
}

pub struct SessionGuard {
    chat_id: ChatId,
    guard: OwnedMutexGuard<Session>,
    registry: SessionRegistry,
}

impl SessionGuard {
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.prune(self.chat_id, &self.guard);
    }
}
