//! Typed publish/subscribe primitive for scene-lifecycle coordination
//!
//! An [`Observable`] holds an ordered list of observers and dispatches
//! payloads to them synchronously. Observers can filter on a bitmask, halt a
//! dispatch early, and unsubscribe from inside their own callback without
//! disturbing the iteration in flight: removals are only marked during
//! dispatch and physically applied once the dispatch completes.

/// Identifies a registered observer so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

/// Per-dispatch state handed to every observer callback.
///
/// The callback may inspect the dispatch mask, stop the current dispatch
/// from reaching the remaining observers, or schedule its own removal.
pub struct EventState {
    mask: i64,
    skip_next_observers: bool,
    unsubscribe_current: bool,
}

impl EventState {
    fn new(mask: i64) -> Self {
        Self {
            mask,
            skip_next_observers: false,
            unsubscribe_current: false,
        }
    }

    /// The mask this dispatch was issued with.
    pub fn mask(&self) -> i64 {
        self.mask
    }

    /// Halt the current dispatch: no further observers are visited.
    pub fn skip_remaining(&mut self) {
        self.skip_next_observers = true;
    }

    /// Unsubscribe the observer currently being notified.
    ///
    /// The removal is deferred until the dispatch completes, so the set of
    /// other observers visited by this dispatch is unaffected.
    pub fn unsubscribe_current(&mut self) {
        self.unsubscribe_current = true;
    }
}

struct Observer<T> {
    handle: ObserverHandle,
    mask: i64,
    once: bool,
    marked_for_removal: bool,
    callback: Box<dyn FnMut(&T, &mut EventState)>,
}

/// Ordered, synchronous event dispatcher.
///
/// Observers are visited in registration order (or front-inserted order).
/// Dispatch never mutates the observer list it iterates: the loop walks a
/// snapshot index range and removals are appended to a pending list that is
/// drained after the outermost dispatch returns.
pub struct Observable<T> {
    observers: Vec<Observer<T>>,
    next_id: u64,
    dispatching: bool,
    pending_removals: Vec<ObserverHandle>,
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observable<T> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 0,
            dispatching: false,
            pending_removals: Vec::new(),
        }
    }

    /// Register an observer receiving every dispatch whose mask overlaps
    /// `mask`. Pass `-1` to receive everything.
    pub fn add<F>(&mut self, callback: F, mask: i64, insert_first: bool) -> ObserverHandle
    where
        F: FnMut(&T, &mut EventState) + 'static,
    {
        self.push_observer(callback, mask, insert_first, false)
    }

    /// Register an observer that removes itself after its first notification.
    pub fn add_once<F>(&mut self, callback: F) -> ObserverHandle
    where
        F: FnMut(&T, &mut EventState) + 'static,
    {
        self.push_observer(callback, -1, false, true)
    }

    fn push_observer<F>(
        &mut self,
        callback: F,
        mask: i64,
        insert_first: bool,
        once: bool,
    ) -> ObserverHandle
    where
        F: FnMut(&T, &mut EventState) + 'static,
    {
        let handle = ObserverHandle(self.next_id);
        self.next_id += 1;
        let observer = Observer {
            handle,
            mask,
            once,
            marked_for_removal: false,
            callback: Box::new(callback),
        };
        if insert_first {
            self.observers.insert(0, observer);
        } else {
            self.observers.push(observer);
        }
        handle
    }

    /// Unsubscribe an observer. Returns false if the handle is unknown.
    ///
    /// During a dispatch the removal is deferred: the observer is marked,
    /// skipped for the remainder of the dispatch, and physically removed once
    /// the dispatch completes.
    pub fn remove(&mut self, handle: ObserverHandle) -> bool {
        let Some(observer) = self.observers.iter_mut().find(|o| o.handle == handle) else {
            return false;
        };
        if self.dispatching {
            observer.marked_for_removal = true;
            self.pending_removals.push(handle);
        } else {
            self.observers.retain(|o| o.handle != handle);
        }
        true
    }

    /// Remove every observer.
    pub fn clear(&mut self) {
        if self.dispatching {
            for observer in &mut self.observers {
                observer.marked_for_removal = true;
                self.pending_removals.push(observer.handle);
            }
        } else {
            self.observers.clear();
        }
    }

    pub fn has_observers(&self) -> bool {
        self.observers.iter().any(|o| !o.marked_for_removal)
    }

    /// Dispatch `payload` to every observer whose mask overlaps `mask`.
    ///
    /// Returns false when an observer requested early termination via
    /// [`EventState::skip_remaining`].
    pub fn notify(&mut self, payload: &T, mask: i64) -> bool {
        let was_dispatching = self.dispatching;
        self.dispatching = true;

        // Snapshot the range: observers registered mid-dispatch only see the
        // next dispatch.
        let count = self.observers.len();
        let mut completed = true;
        let mut state = EventState::new(mask);

        for index in 0..count {
            {
                let observer = &mut self.observers[index];
                if observer.marked_for_removal || observer.mask & mask == 0 {
                    continue;
                }
                state.unsubscribe_current = false;
                (observer.callback)(payload, &mut state);
                if state.unsubscribe_current || observer.once {
                    observer.marked_for_removal = true;
                    self.pending_removals.push(observer.handle);
                }
            }
            if state.skip_next_observers {
                completed = false;
                break;
            }
        }

        self.dispatching = was_dispatching;
        if !self.dispatching {
            self.flush_removals();
        }
        completed
    }

    fn flush_removals(&mut self) {
        if self.pending_removals.is_empty() {
            return;
        }
        self.observers.retain(|o| !o.marked_for_removal);
        self.pending_removals.clear();
    }
}
