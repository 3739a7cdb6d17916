//! Host-owned tables that hand out opaque integer handles.
//!
//! The guest only ever sees the integer; the host resolves it here. Handles
//! start at 1 so that 0 never names a live entry.

/// Arena of host objects addressed by `u32` handles.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store a value and return its handle.
    pub fn insert(&mut self, value: T) -> u32 {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);
                index
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        };
        index as u32 + 1
    }

    /// Look up a handle.
    pub fn get(&self, handle: u32) -> Option<&T> {
        let index = Self::index(handle)?;
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Look up a handle mutably.
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        let index = Self::index(handle)?;
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Remove a handle, returning its value.
    pub fn remove(&mut self, handle: u32) -> Option<T> {
        let index = Self::index(handle)?;
        let value = self.slots.get_mut(index)?.take()?;
        self.free.push(index);
        Some(value)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no handle is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning the values in handle order.
    pub fn drain(&mut self) -> Vec<T> {
        self.free.clear();
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }

    fn index(handle: u32) -> Option<usize> {
        (handle as usize).checked_sub(1)
    }
}
