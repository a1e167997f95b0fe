//! Serial work queue.
//!
//! Items may be pushed from any thread. Whoever calls [`SerialQueue::run`]
//! first becomes the drainer and processes items one at a time, in push
//! order, until the queue is empty; concurrent or re-entrant callers return
//! immediately and leave their items to the active drainer. The queue lock
//! is never held while an item is processed.

use parking_lot::Mutex;
use std::collections::VecDeque;

pub(crate) struct SerialQueue<T> {
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    draining: bool,
}

impl<T> SerialQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                draining: false,
            }),
        }
    }

    pub(crate) fn push(&self, item: T) {
        self.state.lock().items.push_back(item);
    }

    /// Drain the queue with `f`, unless another caller is already draining.
    pub(crate) fn run(&self, mut f: impl FnMut(T)) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let _guard = PanicGuard(self);
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.items.pop_front() {
                    Some(item) => item,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            f(next);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

/// Releases the drainer role if `f` unwinds, so the queue is not wedged.
struct PanicGuard<'a, T>(&'a SerialQueue<T>);

impl<T> Drop for PanicGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.state.lock().draining = false;
        }
    }
}
