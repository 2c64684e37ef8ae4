//! Reusable object pool.
//!
//! Objects are handed out boxed so that an object returned to the pool keeps its
//! allocation: the next `rent` gives back the very same box instead of building a
//! new value.

use crate::error::{EngineError, Result};

pub struct ObjectPool<T> {
    free: Vec<Box<T>>,
    capacity: usize,
    created: usize,
    create: Box<dyn Fn() -> T + Send>,
    reset: Option<Box<dyn Fn(&mut T) + Send>>,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool that keeps at most `capacity` idle objects.
    pub fn new(capacity: usize, create: impl Fn() -> T + Send + 'static) -> Result<Self> {
        if capacity == 0 {
            return Err(EngineError::invalid("capacity", "a pool must hold at least one object"));
        }
        Ok(Self {
            free: Vec::with_capacity(capacity),
            capacity,
            created: 0,
            create: Box::new(create),
            reset: None,
        })
    }

    /// Runs `reset` on every object that comes back to the pool.
    pub fn with_reset(mut self, reset: impl Fn(&mut T) + Send + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }

    /// Hands out the most recently returned object, or constructs one if none is idle.
    pub fn rent(&mut self) -> Box<T> {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.created += 1;
                Box::new((self.create)())
            }
        }
    }

    /// Takes an object back. Returns `false` if the pool was full and the object was dropped.
    pub fn give_back(&mut self, mut item: Box<T>) -> bool {
        if self.free.len() >= self.capacity {
            return false;
        }
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }
        self.free.push(item);
        true
    }

    /// Number of idle objects ready to be rented.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of objects this pool constructed so far.
    pub fn created(&self) -> usize {
        self.created
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("available", &self.free.len())
            .field("capacity", &self.capacity)
            .field("created", &self.created)
            .finish()
    }
}
