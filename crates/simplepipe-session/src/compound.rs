use std::sync::Arc;
use std::time::Instant;

use crate::error::{PipeError, Result};
use crate::session::PipeSession;

/// Fixed-size slot table of a compound session.
///
/// At most one slot is the active delivery target.
#[derive(Debug)]
pub struct CompoundSlots {
    slots: Vec<Option<Arc<PipeSession>>>,
    active: Option<usize>,
    last_change: Instant,
}

impl CompoundSlots {
    pub fn new(capacity: usize, now: Instant) -> Self {
        Self {
            slots: vec![None; capacity],
            active: None,
            last_change: now,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// When a slot was last attached or detached.
    pub fn last_change(&self) -> Instant {
        self.last_change
    }

    /// Place `session` in the first free slot.
    pub fn attach(&mut self, session: Arc<PipeSession>, now: Instant) -> Result<usize> {
        let capacity = self.slots.len();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(PipeError::SlotsFull(capacity))?;
        *slot = Some(session);
        self.last_change = now;
        Ok(index)
    }

    /// Empty a slot. Detaching the active slot leaves no active slot.
    pub fn detach(&mut self, index: usize, now: Instant) -> Option<Arc<PipeSession>> {
        let session = self.slots.get_mut(index)?.take()?;
        if self.active == Some(index) {
            self.active = None;
        }
        self.last_change = now;
        Some(session)
    }

    pub fn position(&self, session: &Arc<PipeSession>) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|existing| Arc::ptr_eq(existing, session))
        })
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        match self.slots.get(index) {
            Some(Some(_)) => {
                self.active = Some(index);
                Ok(())
            }
            _ => Err(PipeError::InvalidSlot(index)),
        }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active(&self) -> Option<&Arc<PipeSession>> {
        self.active
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    pub fn get(&self, index: usize) -> Option<&Arc<PipeSession>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<PipeSession>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|session| (index, session)))
    }
}
