//! In-process per-story exclusion.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use pcast_models::StoryId;

/// Per-story mutual exclusion for work done within one process.
///
/// A caller turned away while the story is held leaves a rerun request
/// behind, so the holder can look again before letting go. Separate
/// processes are kept apart by the registry's compare-and-set on the story
/// status, not by this guard.
#[derive(Debug, Default)]
pub struct InFlightGuard {
    stories: Mutex<HashMap<StoryId, bool>>,
}

/// Held while a story is being worked on; releases the story on drop.
#[derive(Debug)]
pub struct InFlightToken<'a> {
    guard: &'a InFlightGuard,
    story_id: StoryId,
    released: bool,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a story, or `None` if it is already claimed.
    pub fn try_enter(&self, story_id: &StoryId) -> Option<InFlightToken<'_>> {
        let mut stories = self.stories.lock().unwrap_or_else(|e| e.into_inner());
        match stories.entry(story_id.clone()) {
            Entry::Occupied(mut held) => {
                held.insert(true);
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(false);
                Some(InFlightToken {
                    guard: self,
                    story_id: story_id.clone(),
                    released: false,
                })
            }
        }
    }

    pub fn is_held(&self, story_id: &StoryId) -> bool {
        self.stories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(story_id)
    }
}

impl InFlightToken<'_> {
    /// True if another caller was turned away since the last call; the
    /// request is cleared and the story stays held. Otherwise the story is
    /// released under the same lock, so no caller can be turned away
    /// without being seen.
    pub fn take_rerun(&mut self) -> bool {
        if self.released {
            return false;
        }
        let mut stories = self.guard.stories.lock().unwrap_or_else(|e| e.into_inner());
        match stories.get_mut(&self.story_id) {
            Some(requested) if *requested => {
                *requested = false;
                true
            }
            _ => {
                stories.remove(&self.story_id);
                self.released = true;
                false
            }
        }
    }
}

impl Drop for InFlightToken<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.guard
            .stories
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.story_id);
    }
}
