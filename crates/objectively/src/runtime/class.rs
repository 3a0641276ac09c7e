//! `Class` descriptors and lazy interface realization.
//!
//! A [`Class`] is static data: it is declared in a `static` item through the
//! `const` constructor [`Class::new`] and stays inert until the first
//! allocation, cast or explicit [`Class::initialize`] touches it. At that
//! point the class is *realized*:
//!
//! 1. its superclass is realized first,
//! 2. a zeroed interface block is allocated and the superclass's interface is
//!    copied into its prefix,
//! 3. the class's own `initialize` hook overrides or extends entries,
//! 4. the class is pushed onto the global registry and published.
//!
//! # Thread Safety
//!
//! Realization happens exactly once per class. The thread that wins the
//! compare-and-swap on the class state does the work; every other thread
//! blocks on the registry's condition variable until the state becomes
//! [`ClassState::Ready`]. The interface pointer and the ready state are
//! published with release stores and read with acquire loads, so a thread
//! that sees a ready class also sees a fully populated interface.
//!
//! # Poisoning
//!
//! If realization panics (a malformed descriptor, a panicking `initialize`
//! hook) the class is marked [`ClassState::Poisoned`] and every later attempt
//! to use it panics as well, mirroring `std::sync::Once`.

use crate::error::{Error, Result};
use crate::runtime::object::{OBJECT_CLASS, Object, ObjectInterface};
use crate::runtime::registry;
use objectively_log::debug;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::fmt;
use std::iter;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// State value of a realized class.
pub const CLASS_MAGIC: usize = 0x00ab_cdef;

const UNINITIALIZED: usize = 0;
const POISONED: usize = 1;
const INITIALIZING: usize = usize::MAX;

/// Observable realization state of a [`Class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassState {
    /// Never realized, or torn down since.
    Uninitialized,
    /// Some thread is realizing the class right now.
    Initializing,
    /// Interface is populated and published.
    Ready,
    /// Realization panicked; the class is unusable.
    Poisoned,
}

/// Marker for interface structs.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, must embed their superclass's interface
/// as the first field (the archetype's [`ObjectInterface`] has none), and
/// every field must accept the all-zero bit pattern (`Option<fn ..>` entries
/// or nested interfaces). The runtime hands out zeroed blocks and copies
/// superclass prefixes byte for byte.
pub unsafe trait Interface: Sized + 'static {}

/// The interface block handed to a class's `initialize` hook.
///
/// On entry the block holds a copy of the superclass's interface followed by
/// zeroed entries for anything the class adds.
pub struct InterfaceBlock {
    ptr: NonNull<u8>,
    layout: Layout,
    class: &'static Class,
}

impl InterfaceBlock {
    fn alloc(class: &'static Class) -> Self {
        let layout = class.def.interface;

        // SAFETY: validate() guarantees a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };

        InterfaceBlock { ptr, layout, class }
    }

    /// The class being realized.
    #[must_use]
    pub fn class(&self) -> &'static Class {
        self.class
    }

    /// Size of the block in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always `false`; a block holds at least the root interface.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Views the block as interface `I`.
    ///
    /// # Panics
    ///
    /// Panics if `I` does not fit the block's layout, which means the class
    /// declared the wrong interface type.
    pub fn get<I: Interface>(&self) -> &I {
        self.check::<I>();
        // SAFETY: size and alignment checked, Interface guarantees zero-validity
        unsafe { self.ptr.cast::<I>().as_ref() }
    }

    /// Mutable view of the block as interface `I`.
    ///
    /// # Panics
    ///
    /// Panics if `I` does not fit the block's layout.
    pub fn get_mut<I: Interface>(&mut self) -> &mut I {
        self.check::<I>();
        // SAFETY: as in get(), and we hold the only reference to the block
        unsafe { self.ptr.cast::<I>().as_mut() }
    }

    fn check<I: Interface>(&self) {
        if mem::size_of::<I>() > self.layout.size() || mem::align_of::<I>() > self.layout.align()
        {
            fatal!(
                "Class {}: interface type {} does not fit its {} byte interface block",
                self.class.name(),
                std::any::type_name::<I>(),
                self.layout.size()
            );
        }
    }

    fn into_raw(self) -> NonNull<u8> {
        let ptr = self.ptr;
        mem::forget(self);
        ptr
    }
}

impl Drop for InterfaceBlock {
    fn drop(&mut self) {
        // Only reached when realization unwinds before publishing.
        // SAFETY: allocated in alloc() with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Static description of a class, as written by the declaring module.
///
/// Sizes and offsets are normally computed in `const` context:
///
/// ```rust
/// use objectively::runtime::{Class, ClassDef, InterfaceSlot, Object, ObjectInterface, OBJECT_CLASS};
/// use std::alloc::Layout;
/// use std::mem::offset_of;
///
/// #[repr(C)]
/// pub struct Point {
///     object: Object,
///     interface: InterfaceSlot<ObjectInterface>,
///     x: i64,
///     y: i64,
/// }
///
/// pub static POINT_CLASS: Class = Class::new(ClassDef {
///     name: "Point",
///     superclass: Some(&OBJECT_CLASS),
///     instance: Layout::new::<Point>(),
///     interface: Layout::new::<ObjectInterface>(),
///     interface_offset: offset_of!(Point, interface),
///     initialize: None,
///     destroy: None,
/// });
///
/// assert!(POINT_CLASS.validate().is_ok());
/// ```
#[derive(Clone, Copy)]
pub struct ClassDef {
    /// Display name, unique among realized classes.
    pub name: &'static str,
    /// Parent class; `None` only for the archetype.
    pub superclass: Option<&'static Class>,
    /// Layout of an instance.
    pub instance: Layout,
    /// Layout of the interface struct.
    pub interface: Layout,
    /// Byte offset of this class's interface slot inside an instance.
    pub interface_offset: usize,
    /// Writes this class's overrides and additions into its interface.
    pub initialize: Option<fn(&mut InterfaceBlock)>,
    /// Runs once at teardown, before any interface is freed.
    pub destroy: Option<fn(&'static Class)>,
}

struct ClassLocals {
    state: AtomicUsize,
    interface: AtomicPtr<u8>,
    next: AtomicPtr<Class>,
}

/// A class descriptor.
///
/// Classes are compared by identity: two descriptors are the same class only
/// if they are the same `static`.
pub struct Class {
    def: ClassDef,
    locals: ClassLocals,
}

thread_local! {
    // Classes this thread is realizing right now, innermost last.
    static REALIZING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct RealizeGuard {
    class: &'static Class,
    published: bool,
}

impl RealizeGuard {
    fn enter(class: &'static Class) -> Self {
        REALIZING.with_borrow_mut(|stack| stack.push(class.addr()));
        RealizeGuard {
            class,
            published: false,
        }
    }
}

impl Drop for RealizeGuard {
    fn drop(&mut self) {
        let addr = self.class.addr();
        REALIZING.with_borrow_mut(|stack| stack.retain(|&a| a != addr));
        if !self.published {
            registry::poison(self.class);
        }
    }
}

impl Class {
    /// Creates an unrealized class from its definition.
    #[must_use]
    pub const fn new(def: ClassDef) -> Self {
        Class {
            def,
            locals: ClassLocals {
                state: AtomicUsize::new(UNINITIALIZED),
                interface: AtomicPtr::new(ptr::null_mut()),
                next: AtomicPtr::new(ptr::null_mut()),
            },
        }
    }

    /// Class name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Parent class, `None` for the archetype.
    #[must_use]
    pub fn superclass(&self) -> Option<&'static Class> {
        self.def.superclass
    }

    /// Whether this is the archetype every class descends from.
    #[must_use]
    pub fn is_root(&self) -> bool {
        ptr::eq(self, &OBJECT_CLASS)
    }

    /// Layout of an instance of this class.
    #[must_use]
    pub fn instance_layout(&self) -> Layout {
        self.def.instance
    }

    /// Layout of this class's interface.
    #[must_use]
    pub fn interface_layout(&self) -> Layout {
        self.def.interface
    }

    /// Offset of this class's interface slot inside an instance.
    #[must_use]
    pub fn interface_offset(&self) -> usize {
        self.def.interface_offset
    }

    /// Current realization state.
    #[must_use]
    pub fn state(&self) -> ClassState {
        match self.locals.state.load(Ordering::Acquire) {
            UNINITIALIZED => ClassState::Uninitialized,
            POISONED => ClassState::Poisoned,
            CLASS_MAGIC => ClassState::Ready,
            _ => ClassState::Initializing,
        }
    }

    /// Whether the class is realized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.locals.state.load(Ordering::Acquire) == CLASS_MAGIC
    }

    /// This class followed by each of its ancestors up to the archetype.
    pub fn ancestors(&'static self) -> impl Iterator<Item = &'static Class> {
        iter::successors(Some(self), |class| class.superclass())
    }

    /// Whether `self` is `other` or descends from it.
    #[must_use]
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if ptr::eq(class, other) {
                return true;
            }
            current = class.def.superclass;
        }
        false
    }

    /// Checks the static wiring of this descriptor.
    ///
    /// Realization runs this first and treats any error as fatal.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule: missing name, missing superclass,
    /// layouts smaller than the root's or than the superclass's, or an
    /// interface slot that is misaligned, out of bounds or overlapping the
    /// superclass's part of the instance.
    pub fn validate(&self) -> Result<()> {
        let def = &self.def;
        let class = def.name;

        if class.is_empty() {
            return Err(Error::MissingName);
        }

        let (header, root_interface) = (
            Layout::new::<Object>(),
            Layout::new::<ObjectInterface>(),
        );
        if def.instance.size() < header.size() || def.instance.align() < header.align() {
            return Err(Error::InstanceTooSmall {
                class,
                size: def.instance.size(),
                required: header.size(),
            });
        }
        if def.interface.size() < root_interface.size()
            || def.interface.align() < root_interface.align()
        {
            return Err(Error::InterfaceTooSmall {
                class,
                size: def.interface.size(),
                required: root_interface.size(),
            });
        }

        let slot = mem::size_of::<*const u8>();
        let offset = def.interface_offset;
        if offset % mem::align_of::<*const u8>() != 0
            || offset
                .checked_add(slot)
                .is_none_or(|end| end > def.instance.size())
        {
            return Err(Error::InvalidInterfaceOffset { class, offset });
        }

        match def.superclass {
            None if !self.is_root() => Err(Error::MissingSuperclass { class }),
            None => Ok(()),
            Some(superclass) => {
                let (sup_instance, sup_interface) = (superclass.def.instance, superclass.def.interface);
                if sup_instance.size() > def.instance.size()
                    || sup_instance.align() > def.instance.align()
                {
                    return Err(Error::InstanceShrinks {
                        class,
                        superclass: superclass.name(),
                    });
                }
                if sup_interface.size() > def.interface.size()
                    || sup_interface.align() > def.interface.align()
                {
                    return Err(Error::InterfaceShrinks {
                        class,
                        superclass: superclass.name(),
                    });
                }
                // The slot lives in this class's own part of the instance.
                if offset < sup_instance.size() {
                    return Err(Error::InvalidInterfaceOffset { class, offset });
                }
                Ok(())
            }
        }
    }

    /// Realizes the class if needed.
    ///
    /// Idempotent and safe to call from any number of threads; returns once
    /// the class is ready.
    ///
    /// # Panics
    ///
    /// Panics if the descriptor is malformed, if the class is poisoned, or if
    /// called re-entrantly from the class's own `initialize` hook.
    pub fn initialize(&'static self) {
        if self.is_initialized() {
            return;
        }

        match self.locals.state.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.realize(),
            Err(CLASS_MAGIC) => {}
            Err(_) => {
                if REALIZING.with_borrow(|stack| stack.contains(&self.addr())) {
                    fatal!("Class {} was re-entered while being initialized", self.name());
                }
                registry::wait_until_ready(self);
            }
        }
    }

    fn realize(&'static self) {
        let mut guard = RealizeGuard::enter(self);

        if let Err(err) = self.validate() {
            fatal!("{err}");
        }

        let mut block = InterfaceBlock::alloc(self);

        match self.def.superclass {
            None => registry::setup(),
            Some(superclass) => {
                superclass.initialize();

                let inherited = superclass.def.interface.size();
                // SAFETY: the superclass is ready, its block holds `inherited`
                // bytes and ours at least as many (validated above)
                unsafe {
                    ptr::copy_nonoverlapping(
                        superclass.interface_ptr().as_ptr(),
                        block.ptr.as_ptr(),
                        inherited,
                    );
                }
            }
        }

        if let Some(initialize) = self.def.initialize {
            initialize(&mut block);
        }

        if let Err(err) = registry::register(self, block) {
            fatal!("{err}");
        }
        guard.published = true;

        debug!(
            "realized class {} (instance {} bytes, interface {} bytes)",
            self.name(),
            self.def.instance.size(),
            self.def.interface.size()
        );
    }

    /// Publishes the realized interface. Called by the registry with its
    /// lock held.
    pub(crate) fn publish(&'static self, block: InterfaceBlock, next: Option<&'static Class>) {
        let interface = block.into_raw();
        self.locals.next.store(as_mut_ptr(next), Ordering::Relaxed);
        self.locals
            .interface
            .store(interface.as_ptr(), Ordering::Release);
        self.locals.state.store(CLASS_MAGIC, Ordering::Release);
    }

    pub(crate) fn mark_poisoned(&self) {
        self.locals.state.store(POISONED, Ordering::Release);
    }

    pub(crate) fn next_registered(&self) -> Option<&'static Class> {
        // SAFETY: the list only ever links `&'static Class` values
        unsafe { self.locals.next.load(Ordering::Acquire).as_ref() }
    }

    pub(crate) fn destroy_hook(&self) -> Option<fn(&'static Class)> {
        self.def.destroy
    }

    /// Frees the interface block and returns the class to the uninitialized
    /// state.
    ///
    /// # Safety
    ///
    /// No instance of this class (or of a subclass) may be used afterwards,
    /// and no other thread may be touching the class.
    pub(crate) unsafe fn reset(&self) {
        let interface = self.locals.interface.swap(ptr::null_mut(), Ordering::AcqRel);
        if !interface.is_null() {
            // SAFETY: allocated by InterfaceBlock::alloc with this layout
            unsafe { alloc::dealloc(interface, self.def.interface) };
        }
        self.locals.next.store(ptr::null_mut(), Ordering::Relaxed);
        self.locals.state.store(UNINITIALIZED, Ordering::Release);
    }

    /// Pointer to the realized interface block, realizing the class first.
    pub fn interface_ptr(&'static self) -> NonNull<u8> {
        self.initialize();
        match NonNull::new(self.locals.interface.load(Ordering::Acquire)) {
            Some(interface) => interface,
            None => fatal!("Class {} is ready without an interface", self.name()),
        }
    }

    /// The realized interface viewed as `I`, realizing the class first.
    ///
    /// This is how superclass dispatch reads the parent's table directly.
    ///
    /// # Panics
    ///
    /// Panics if `I` is larger than this class's interface.
    pub fn interface<I: Interface>(&'static self) -> &'static I {
        let interface = self.interface_ptr();
        if mem::size_of::<I>() > self.def.interface.size() {
            fatal!(
                "Class {}: interface type {} exceeds its {} byte interface",
                self.name(),
                std::any::type_name::<I>(),
                self.def.interface.size()
            );
        }
        // SAFETY: the block is immutable after publication and lives until
        // teardown; size checked above, Interface guarantees the layout
        unsafe { interface.cast::<I>().as_ref() }
    }

    fn addr(&self) -> usize {
        ptr::from_ref(self) as usize
    }
}

fn as_mut_ptr(class: Option<&'static Class>) -> *mut Class {
    class.map_or(ptr::null_mut(), |class| ptr::from_ref(class).cast_mut())
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for Class {}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name())
            .field("superclass", &self.superclass().map(Class::name))
            .field("instance_size", &self.def.instance.size())
            .field("interface_size", &self.def.interface.size())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
