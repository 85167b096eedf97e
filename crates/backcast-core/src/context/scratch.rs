//! Typed per-strategy scratch storage.
//!
//! Values are stored under a [`StateKey<T>`]; the key carries the value type,
//! so reads never need a caller-side cast. Reading a missing key, or a key
//! whose name was last written with a different type, yields `None` (or
//! `T::default()` through [`Scratch::get_or_default`]).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

#[derive(Default)]
pub struct Scratch {
    values: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Send + 'static>(&mut self, key: StateKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    pub fn get<T: 'static>(&self, key: StateKey<T>) -> Option<&T> {
        self.values.get(key.name)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: 'static>(&mut self, key: StateKey<T>) -> Option<&mut T> {
        self.values.get_mut(key.name)?.downcast_mut::<T>()
    }

    pub fn get_or_default<T: Clone + Default + 'static>(&self, key: StateKey<T>) -> T {
        self.get(key).cloned().unwrap_or_default()
    }

    pub fn remove<T: 'static>(&mut self, key: StateKey<T>) -> Option<T> {
        if !self.contains(key) {
            return None;
        }
        let boxed = self.values.remove(key.name)?;
        boxed.downcast::<T>().ok().map(|value| *value)
    }

    pub fn contains<T: 'static>(&self, key: StateKey<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Scratch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Scratch").field("keys", &keys).finish()
    }
}
