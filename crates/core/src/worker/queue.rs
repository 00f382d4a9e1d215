//! In-memory work queues with per-key debounce.
//!
//! Items are not persisted; losing the process loses the queue. The
//! debounce window suppresses flapping (the same key queued repeatedly in
//! quick succession), independent of any longer freshness gate downstream.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::TtlCache;

/// Default per-key debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5 * 60);

const DEBOUNCE_CAPACITY: usize = 4096;

type KeyFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;
type TransformFn<T> = Box<dyn Fn(T) -> T + Send + Sync>;

/// A keyed FIFO with a per-key debounce window.
pub struct WorkerQueue<T> {
    items: Mutex<VecDeque<T>>,
    recent: TtlCache<String, ()>,
    get_key: KeyFn<T>,
    transform: Option<TransformFn<T>>,
    pub disabled: bool,
}

impl<T> WorkerQueue<T> {
    pub fn new(debounce: Duration, get_key: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            recent: TtlCache::new(DEBOUNCE_CAPACITY, debounce),
            get_key: Box::new(get_key),
            transform: None,
            disabled: false,
        }
    }

    /// Normalize items on insert.
    pub fn with_transform(mut self, transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Insert an item unless its key was inserted within the debounce
    /// window.
    pub fn queue(&self, item: T) {
        if self.disabled {
            return;
        }
        let item = match &self.transform {
            Some(transform) => transform(item),
            None => item,
        };
        let key = (self.get_key)(&item);
        if self.recent.contains(&key) {
            return;
        }
        self.recent.insert(key, ());
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.push_back(item);
    }

    /// Drain the current contents, calling `handler` once per item. On a
    /// handler error the unprocessed remainder is requeued.
    pub fn process<E>(&self, mut handler: impl FnMut(T) -> Result<(), E>) -> Result<(), E> {
        let mut drained: VecDeque<T> = {
            let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *items)
        };

        while let Some(item) = drained.pop_front() {
            if let Err(err) = handler(item) {
                // Keep what we could not process for the next tick.
                let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
                for leftover in drained {
                    items.push_back(leftover);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.is_empty()
    }

    pub fn len(&self) -> usize {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.len()
    }
}
