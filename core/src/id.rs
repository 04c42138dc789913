//! Identifier generation for new todos.
//!
//! # Design
//! Ids are uniform random 32-bit values widened to `u64`. Zero is never
//! produced. Uniqueness is not guaranteed by the generator itself:
//! `TodoService::create` checks every id against the primary index through
//! the insert and draws again on collision.

#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::Mutex;

/// Source of candidate ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Uniform random non-zero 32-bit ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> u64 {
        loop {
            let id = u64::from(rand::random::<u32>());
            if id != 0 {
                return id;
            }
        }
    }
}

/// Hands out a fixed list of ids in order, then repeats the last one.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ScriptedIds {
    ids: Mutex<VecDeque<u64>>,
    last: u64,
}

#[cfg(test)]
impl ScriptedIds {
    pub(crate) fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        let ids: VecDeque<u64> = ids.into_iter().collect();
        let last = ids.back().copied().unwrap_or(1);
        Self {
            ids: Mutex::new(ids),
            last,
        }
    }
}

#[cfg(test)]
impl IdGenerator for ScriptedIds {
    fn next_id(&self) -> u64 {
        let mut ids = match self.ids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ids.pop_front().unwrap_or(self.last)
    }
}
