//! Process-wide registry of realized classes.
//!
//! Every realized class is linked into an intrusive singly linked list
//! (newest first) and indexed by name. The list exists for [`teardown`]; the
//! index backs [`class_for_name`].
//!
//! The registry itself is created once, the first time the archetype class is
//! realized, and guarded by a `OnceLock` like the rest of the runtime's
//! global state.

use crate::error::{Error, Result};
use crate::runtime::class::{Class, ClassState, InterfaceBlock};
use fxhash::FxHashMap;
use objectively_log::{debug, info};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

struct ClassRegistry {
    /// Head of the intrusive list of realized classes.
    head: Mutex<Option<&'static Class>>,
    /// Realized classes by name.
    names: RwLock<FxHashMap<&'static str, &'static Class>>,
    /// Signalled whenever a class becomes ready or poisoned.
    settled: Condvar,
}

static REGISTRY: OnceLock<ClassRegistry> = OnceLock::new();

fn get_registry() -> &'static ClassRegistry {
    REGISTRY.get_or_init(|| {
        debug!("class registry created");
        ClassRegistry {
            head: Mutex::new(None),
            names: RwLock::new(FxHashMap::default()),
            settled: Condvar::new(),
        }
    })
}

impl ClassRegistry {
    fn lock_head(&self) -> MutexGuard<'_, Option<&'static Class>> {
        self.head.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One-time process setup performed while realizing the archetype.
pub(crate) fn setup() {
    get_registry();
}

/// Links a freshly realized class into the registry and publishes it.
pub(crate) fn register(class: &'static Class, block: InterfaceBlock) -> Result<()> {
    let registry = get_registry();
    let mut head = registry.lock_head();

    {
        let mut names = registry
            .names
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if names.contains_key(class.name()) {
            return Err(Error::DuplicateClassName { name: class.name() });
        }
        names.insert(class.name(), class);
    }

    class.publish(block, *head);
    *head = Some(class);
    drop(head);

    registry.settled.notify_all();
    Ok(())
}

/// Marks a class whose realization unwound as poisoned and wakes waiters.
pub(crate) fn poison(class: &'static Class) {
    let registry = get_registry();
    {
        let _head = registry.lock_head();
        class.mark_poisoned();
    }
    registry.settled.notify_all();
}

/// Blocks until another thread finishes realizing `class`.
pub(crate) fn wait_until_ready(class: &'static Class) {
    let registry = get_registry();
    let mut head = registry.lock_head();
    loop {
        match class.state() {
            ClassState::Ready => return,
            ClassState::Poisoned => {
                drop(head);
                fatal!("Class {} is poisoned by a failed initialization", class.name());
            }
            ClassState::Initializing | ClassState::Uninitialized => {
                head = registry
                    .settled
                    .wait(head)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

/// Looks up a realized class by name.
///
/// Classes that were never touched (no allocation, cast or explicit
/// [`Class::initialize`]) are not known to the registry yet.
#[must_use]
pub fn class_for_name(name: &str) -> Option<&'static Class> {
    let registry = REGISTRY.get()?;
    let names = registry
        .names
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    names.get(name).copied()
}

/// Snapshot of all realized classes, in realization order.
#[must_use]
pub fn registered_classes() -> Vec<&'static Class> {
    let Some(registry) = REGISTRY.get() else {
        return Vec::new();
    };
    let head = registry.lock_head();
    let mut classes = collect(*head);
    classes.reverse();
    classes
}

fn collect(head: Option<&'static Class>) -> Vec<&'static Class> {
    let mut classes = Vec::new();
    let mut current = head;
    while let Some(class) = current {
        classes.push(class);
        current = class.next_registered();
    }
    classes
}

/// Tears down every realized class.
///
/// Runs in two passes. First, every class's `destroy` hook runs; a hook may
/// still call methods on instances of any class, and classes realized by a
/// hook have their own hooks run in turn. Only then are the interface blocks
/// freed and each class reset to [`ClassState::Uninitialized`], so the class
/// can be realized again later.
///
/// Returns the number of classes torn down.
///
/// # Panics
///
/// A panicking `destroy` hook skips the hooks that have not run yet, but the
/// second pass still resets every class before the panic resumes.
///
/// # Safety
///
/// After this returns, no instance allocated before the call may be used in
/// any way (method calls, retain, release, cast), and no other thread may be
/// using the runtime while it runs.
pub unsafe fn teardown() -> usize {
    let Some(registry) = REGISTRY.get() else {
        return 0;
    };

    let mut pass = Teardown {
        registry,
        realized: Vec::new(),
    };
    loop {
        let batch = {
            let mut head = registry.lock_head();
            collect(head.take())
        };
        if batch.is_empty() {
            break;
        }
        let start = pass.realized.len();
        pass.realized.extend(batch);
        for &class in &pass.realized[start..] {
            if let Some(destroy) = class.destroy_hook() {
                debug!("destroying class {}", class.name());
                destroy(class);
            }
        }
    }

    let count = pass.realized.len();
    drop(pass);

    info!("tore down {count} classes");
    count
}

/// The second teardown pass, run on drop so that it also runs when a
/// `destroy` hook panics.
struct Teardown {
    registry: &'static ClassRegistry,
    realized: Vec<&'static Class>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        // Classes still linked here were realized by a hook that then
        // panicked; they are reset without running their own hooks.
        let leftover = collect(self.registry.lock_head().take());
        self.realized.extend(leftover);

        self.registry
            .names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        for class in &self.realized {
            // SAFETY: teardown's caller guarantees nothing uses these
            // classes anymore
            unsafe { class.reset() };
        }
    }
}
