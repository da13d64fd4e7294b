use std::any::Any;
use std::collections::HashMap;

/// Per-flow state of one instance, keyed by the message's flow key.
///
/// Values are type-erased; accessors downcast to the requested type and
/// treat a value of another type as absent.
#[derive(Default)]
pub struct KeyedState {
    entries: HashMap<u64, Box<dyn Any + Send>>,
}

impl KeyedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` for `key`, returning true if an entry was replaced.
    pub fn insert<T: Any + Send>(&mut self, key: u64, value: T) -> bool {
        self.entries.insert(key, Box::new(value)).is_some()
    }

    pub fn get<T: Any + Send>(&self, key: u64) -> Option<&T> {
        self.entries.get(&key)?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: u64) -> Option<&mut T> {
        self.entries.get_mut(&key)?.downcast_mut()
    }

    /// Removes and returns the entry for `key` if it holds a `T`. An entry of
    /// another type is left in place.
    pub fn remove<T: Any + Send>(&mut self, key: u64) -> Option<T> {
        if !self.entries.get(&key)?.is::<T>() {
            return None;
        }
        let boxed = self.entries.remove(&key)?;
        boxed.downcast().ok().map(|value| *value)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Drops every entry, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

impl std::fmt::Debug for KeyedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedState").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Connection {
        bytes_read: usize,
    }

    #[test]
    fn test_typed_access() {
        let mut state = KeyedState::new();
        assert!(!state.insert(7, Connection { bytes_read: 0 }));

        state.get_mut::<Connection>(7).unwrap().bytes_read += 12;
        assert_eq!(state.get::<Connection>(7), Some(&Connection { bytes_read: 12 }));
        assert_eq!(state.get::<String>(7), None);
    }

    #[test]
    fn test_remove_requires_matching_type() {
        let mut state = KeyedState::new();
        state.insert(1, String::from("partial request"));

        assert_eq!(state.remove::<u32>(1), None);
        assert!(state.contains(1));
        assert_eq!(state.remove::<String>(1).as_deref(), Some("partial request"));
        assert!(state.is_empty());
    }
}
