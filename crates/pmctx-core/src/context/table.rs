//! Dense handle allocation.

use std::fmt;

/// Small integer naming one open context. Handles of destroyed contexts
/// are handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextHandle(u32);

impl ContextHandle {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot vector where every insert takes the lowest free slot.
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next `insert` will return.
    pub fn next_free(&self) -> ContextHandle {
        let idx = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len());
        ContextHandle(idx as u32)
    }

    pub fn insert(&mut self, value: T) -> ContextHandle {
        match self.slots.iter().position(Option::is_none) {
            Some(idx) => {
                self.slots[idx] = Some(value);
                ContextHandle(idx as u32)
            }
            None => {
                self.slots.push(Some(value));
                ContextHandle((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, handle: ContextHandle) -> Option<&T> {
        self.slots.get(handle.0 as usize)?.as_ref()
    }

    pub fn remove(&mut self, handle: ContextHandle) -> Option<T> {
        let value = self.slots.get_mut(handle.0 as usize)?.take();
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        value
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextHandle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|v| (ContextHandle(idx as u32), v)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
