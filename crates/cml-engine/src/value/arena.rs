//! Value arena with generation-checked handles

use std::fmt;

use super::ClassVal;
use crate::error::{EngineError, EngineResult};

/// Stable handle to a value in a [`ValueArena`]
///
/// A handle stays valid until its value is removed. The slot may then be
/// reused, but the generation changes, so an old handle is reported as stale
/// instead of silently reading the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId {
    index: u32,
    generation: u32,
}

impl ValueId {
    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    value: Option<ClassVal>,
}

/// Owner of every live value of one engine
#[derive(Debug, Default)]
pub struct ValueArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ValueArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning its handle
    pub fn insert(&mut self, value: ClassVal) -> ValueId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ValueId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ValueId {
            index,
            generation: 0,
        }
    }

    /// Borrow a value
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if the handle's value was removed.
    pub fn get(&self, id: ValueId) -> EngineResult<&ClassVal> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| EngineError::StaleValue(id.to_string()))
    }

    /// Mutably borrow a value
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if the handle's value was removed.
    pub fn get_mut(&mut self, id: ValueId) -> EngineResult<&mut ClassVal> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or_else(|| EngineError::StaleValue(id.to_string()))
    }

    /// Borrow one value mutably and another immutably
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if either handle is stale, or if both
    /// handles name the same value.
    pub fn pair_mut(
        &mut self,
        target: ValueId,
        src: ValueId,
    ) -> EngineResult<(&mut ClassVal, &ClassVal)> {
        // Validate both first so the split below only sees live slots
        self.get(target)?;
        self.get(src)?;
        if target.index == src.index {
            return Err(EngineError::StaleValue(src.to_string()));
        }

        let (t, s) = (target.index as usize, src.index as usize);
        let (target_slot, src_slot) = if t < s {
            let (low, high) = self.slots.split_at_mut(s);
            (&mut low[t], &high[0])
        } else {
            let (low, high) = self.slots.split_at_mut(t);
            (&mut high[0], &low[s])
        };

        match (target_slot.value.as_mut(), src_slot.value.as_ref()) {
            (Some(target_val), Some(src_val)) => Ok((target_val, src_val)),
            _ => Err(EngineError::StaleValue(target.to_string())),
        }
    }

    /// Remove a value, invalidating its handle
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if the handle was already removed.
    pub fn remove(&mut self, id: ValueId) -> EngineResult<ClassVal> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.value.is_some())
            .ok_or_else(|| EngineError::StaleValue(id.to_string()))?;

        let value = slot.value.take().ok_or_else(|| EngineError::StaleValue(id.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(value)
    }

    /// True if the handle refers to a live value
    pub fn contains(&self, id: ValueId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of live values
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no values are live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
