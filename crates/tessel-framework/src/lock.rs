//! All-or-nothing, reentrant, multi-item locking with a bounded wait.
//!
//! Every lifecycle-mutating operation names the items it needs up front and
//! receives them together or not at all. Because no caller ever holds part
//! of a set while waiting for the rest, overlapping requests in different
//! orders cannot deadlock.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tessel_core::BundleId;
use tracing::{trace, warn};

use crate::error::{FrameworkError, FrameworkResult};

/// Something a lifecycle operation can lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockItem {
    /// One bundle's lifecycle.
    Bundle(BundleId),
    /// The wiring graph: resolution, refresh and revision disposal.
    FrameworkWiring,
}

impl fmt::Display for LockItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle(id) => write!(f, "bundle {id}"),
            Self::FrameworkWiring => f.write_str("framework wiring"),
        }
    }
}

#[derive(Debug)]
struct Holder {
    owner: ThreadId,
    count: usize,
}

#[derive(Debug)]
struct HeldContext {
    id: u64,
    method: &'static str,
    items: Vec<LockItem>,
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<LockItem, Holder>,
    stacks: HashMap<ThreadId, Vec<HeldContext>>,
    next_context: u64,
}

impl LockTable {
    fn available(&self, owner: ThreadId, items: &[LockItem]) -> bool {
        items
            .iter()
            .all(|item| self.held.get(item).is_none_or(|h| h.owner == owner))
    }

    fn acquire(&mut self, owner: ThreadId, method: &'static str, items: &[LockItem]) -> u64 {
        for item in items {
            let holder = self.held.entry(*item).or_insert(Holder { owner, count: 0 });
            holder.count = holder.count.saturating_add(1);
        }
        let id = self.next_context;
        self.next_context = self.next_context.wrapping_add(1);
        self.stacks.entry(owner).or_default().push(HeldContext {
            id,
            method,
            items: items.to_vec(),
        });
        id
    }

    fn release(&mut self, owner: ThreadId, id: u64, items: &[LockItem]) {
        for item in items {
            if let Some(holder) = self.held.get_mut(item) {
                holder.count = holder.count.saturating_sub(1);
                if holder.count == 0 {
                    self.held.remove(item);
                }
            }
        }
        if let Some(stack) = self.stacks.get_mut(&owner) {
            stack.retain(|ctx| ctx.id != id);
            if stack.is_empty() {
                self.stacks.remove(&owner);
            }
        }
    }
}

fn normalized(items: &[LockItem]) -> Vec<LockItem> {
    let mut items = items.to_vec();
    items.sort_unstable();
    items.dedup();
    items
}

/// Grants sets of [`LockItem`]s to threads.
///
/// Locks are reentrant per thread: a thread that already holds an item may
/// acquire it again, and must release it as many times.
#[derive(Debug)]
pub struct LockCoordinator {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Duration,
}

impl LockCoordinator {
    /// Create a coordinator whose acquisitions wait at most `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// How long an acquisition waits before failing.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire every item in `items`, or none of them.
    ///
    /// While any item is held by another thread the caller waits for a
    /// release and retries the whole set.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::LockTimeout`] naming `method` and the items
    /// if the set could not be acquired within the timeout.
    pub fn lock(&self, method: &'static str, items: &[LockItem]) -> FrameworkResult<LockContext<'_>> {
        let owner = thread::current().id();
        let items = normalized(items);

        let deadline = Instant::now().checked_add(self.timeout);
        let mut table = self.table();
        loop {
            if table.available(owner, &items) {
                return Ok(self.grant(&mut table, owner, method, items));
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.timeout,
            };
            if remaining.is_zero() {
                drop(table);
                warn!(method, items = ?items, timeout = ?self.timeout, "Lock acquisition timed out");
                return Err(FrameworkError::LockTimeout {
                    method,
                    items,
                    timeout: self.timeout,
                });
            }
            table = self
                .released
                .wait_timeout(table, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Acquire every item in `items` if all are free right now.
    ///
    /// Never waits. For callers that already hold other items and must not
    /// wait for more while holding them.
    pub fn try_lock(&self, method: &'static str, items: &[LockItem]) -> Option<LockContext<'_>> {
        let owner = thread::current().id();
        let items = normalized(items);
        let mut table = self.table();
        if !table.available(owner, &items) {
            trace!(method, items = ?items, "Locks busy");
            return None;
        }
        Some(self.grant(&mut table, owner, method, items))
    }

    fn grant(
        &self,
        table: &mut LockTable,
        owner: ThreadId,
        method: &'static str,
        items: Vec<LockItem>,
    ) -> LockContext<'_> {
        let id = table.acquire(owner, method, &items);
        trace!(method, items = ?items, "Locks acquired");
        LockContext {
            coordinator: self,
            owner,
            id,
            method,
            items,
            _not_send: PhantomData,
        }
    }

    fn release(&self, owner: ThreadId, id: u64, items: &[LockItem]) {
        self.table().release(owner, id, items);
        self.released.notify_all();
    }

    /// Items currently held by the calling thread, sorted.
    #[must_use]
    pub fn held_by_current_thread(&self) -> Vec<LockItem> {
        let owner = thread::current().id();
        let table = self.table();
        let mut items: Vec<LockItem> = table
            .held
            .iter()
            .filter(|(_, h)| h.owner == owner)
            .map(|(item, _)| *item)
            .collect();
        items.sort_unstable();
        items
    }

    /// Methods of the calling thread's held contexts, outermost first.
    #[must_use]
    pub fn context_stack(&self) -> Vec<&'static str> {
        let owner = thread::current().id();
        self.table()
            .stacks
            .get(&owner)
            .map(|stack| stack.iter().map(|ctx| ctx.method).collect())
            .unwrap_or_default()
    }

    /// Whether any thread holds `item`.
    #[must_use]
    pub fn is_locked(&self, item: LockItem) -> bool {
        self.table().held.contains_key(&item)
    }
}

/// A set of items held together by one operation.
///
/// Released on drop. Must be released on the thread that acquired it.
#[derive(Debug)]
#[must_use = "locks are released as soon as the context is dropped"]
pub struct LockContext<'a> {
    coordinator: &'a LockCoordinator,
    owner: ThreadId,
    id: u64,
    method: &'static str,
    items: Vec<LockItem>,
    _not_send: PhantomData<*const ()>,
}

impl LockContext<'_> {
    /// The operation that acquired this context.
    #[must_use]
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// The items held, sorted.
    #[must_use]
    pub fn items(&self) -> &[LockItem] {
        &self.items
    }

    /// Release the items now.
    pub fn unlock(self) {
        drop(self);
    }
}

impl Drop for LockContext<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.owner, self.id, &self.items);
        trace!(method = self.method, items = ?self.items, "Locks released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;

    const B1: LockItem = LockItem::Bundle(BundleId(1));
    const B2: LockItem = LockItem::Bundle(BundleId(2));

    #[test]
    fn test_display() {
        assert_eq!(B1.to_string(), "bundle 1");
        assert_eq!(LockItem::FrameworkWiring.to_string(), "framework wiring");
    }

    #[test]
    fn test_reentrant_acquisition_and_stack() {
        let coordinator = LockCoordinator::new(Duration::from_millis(50));
        let outer = coordinator.lock("update", &[B1, LockItem::FrameworkWiring]).unwrap();
        let inner = coordinator.lock("stop", &[B1]).unwrap();

        assert_eq!(coordinator.context_stack(), vec!["update", "stop"]);
        assert_eq!(
            coordinator.held_by_current_thread(),
            vec![B1, LockItem::FrameworkWiring]
        );

        inner.unlock();
        assert!(coordinator.is_locked(B1));
        assert_eq!(outer.method(), "update");
        drop(outer);
        assert!(!coordinator.is_locked(B1));
        assert!(coordinator.context_stack().is_empty());
    }

    #[test]
    fn test_duplicate_items_are_collapsed() {
        let coordinator = LockCoordinator::new(Duration::from_millis(50));
        let ctx = coordinator.lock("start", &[B2, B1, B2]).unwrap();
        assert_eq!(ctx.items(), &[B1, B2]);
        drop(ctx);
        assert!(!coordinator.is_locked(B2));
    }

    #[test]
    fn test_timeout_names_method_and_items() {
        let coordinator = Arc::new(LockCoordinator::new(Duration::from_millis(30)));
        let held = coordinator.lock("start", &[B1]).unwrap();

        let other = Arc::clone(&coordinator);
        let err = thread::spawn(move || other.lock("stop", &[B1]).map(|_| ()))
            .join()
            .unwrap()
            .unwrap_err();
        match err {
            FrameworkError::LockTimeout { method, items, .. } => {
                assert_eq!(method, "stop");
                assert_eq!(items, vec![B1]);
            },
            other => panic!("unexpected error: {other}"),
        }
        drop(held);
    }

    #[test]
    fn test_all_or_nothing_leaves_free_items_untouched() {
        let coordinator = Arc::new(LockCoordinator::new(Duration::from_millis(30)));
        let held = coordinator.lock("start", &[B1]).unwrap();

        let other = Arc::clone(&coordinator);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let result = other.lock("update", &[B2, B1]).map(|_| ());
            tx.send(result.is_err()).unwrap();
        })
        .join()
        .unwrap();

        assert!(rx.recv().unwrap());
        assert!(!coordinator.is_locked(B2));
        drop(held);
    }

    #[test]
    fn test_try_lock_never_waits() {
        let coordinator = Arc::new(LockCoordinator::new(Duration::from_secs(5)));
        let held = coordinator.lock("refresh_bundles", &[LockItem::FrameworkWiring]).unwrap();

        let other = Arc::clone(&coordinator);
        let busy = thread::spawn(move || {
            let started = Instant::now();
            let got = other.try_lock("resolve", &[B1, LockItem::FrameworkWiring]).is_some();
            (got, started.elapsed(), other.is_locked(B1))
        })
        .join()
        .unwrap();
        assert_eq!((busy.0, busy.2), (false, false));
        assert!(busy.1 < Duration::from_secs(1));

        let again = coordinator.try_lock("resolve", &[LockItem::FrameworkWiring]).unwrap();
        assert_eq!(coordinator.context_stack(), vec!["refresh_bundles", "resolve"]);
        drop(again);
        drop(held);
        assert!(coordinator.try_lock("resolve", &[B1]).is_some());
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let coordinator = Arc::new(LockCoordinator::new(Duration::from_secs(5)));
        let held = coordinator.lock("start", &[B1]).unwrap();

        let other = Arc::clone(&coordinator);
        let waiter = thread::spawn(move || {
            let ctx = other.lock("stop", &[B1, B2]).unwrap();
            ctx.items().to_vec()
        });

        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert_eq!(waiter.join().unwrap(), vec![B1, B2]);
        assert!(!coordinator.is_locked(B1));
    }
}
