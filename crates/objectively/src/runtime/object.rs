//! The archetype `Object` class, instance allocation and reference counting.
//!
//! Every instance begins with an [`Object`] header:
//! - the concrete class (written once at allocation),
//! - the archetype's interface slot,
//! - an atomic reference count starting at 1.
//!
//! A subclass instance is a `#[repr(C)]` struct whose first field is its
//! superclass's instance struct, followed by its own [`InterfaceSlot`] and its
//! own fields. The allocator wires every slot of every ancestor to the
//! *concrete* class's interface, so a call issued through any base-typed view
//! reaches the most-derived override. Superclass calls go through the
//! superclass's [`Class`] instead (see [`Instance::super_interface`]).
//!
//! # Thread Safety
//!
//! Reference counts are per-instance atomics; retain/release on unrelated
//! instances never contend. Releasing the last reference synchronizes with
//! every earlier release (release decrement plus acquire fence) before the
//! `dealloc` chain runs.

use crate::error::{Error, Result};
use crate::runtime::class::{Class, ClassDef, Interface, InterfaceBlock};
use crate::runtime::id::Id;
use objectively_log::{error, trace};
use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::offset_of;
use std::ptr::{self, NonNull};
use std::sync::atomic::{self, AtomicUsize, Ordering};

/// A pointer to the interface of the class an instance was allocated as,
/// viewed as interface `I`.
///
/// Slots are written only by the allocator; there is no way to build one.
#[repr(transparent)]
pub struct InterfaceSlot<I: 'static> {
    ptr: *const I,
    marker: PhantomData<&'static I>,
}

// SAFETY: a slot points at an interface block that is immutable after
// publication and outlives every instance
unsafe impl<I: Sync + 'static> Send for InterfaceSlot<I> {}
unsafe impl<I: Sync + 'static> Sync for InterfaceSlot<I> {}

impl<I: Interface> InterfaceSlot<I> {
    /// The interface this slot points at.
    #[must_use]
    pub fn get(&self) -> &'static I {
        debug_assert!(!self.ptr.is_null(), "interface slot read before wiring");
        // SAFETY: slots only exist inside allocated instances, where they
        // were wired to a live, published interface block
        unsafe { &*self.ptr }
    }
}

impl<I: 'static> fmt::Debug for InterfaceSlot<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceSlot({:p})", self.ptr)
    }
}

/// The header every instance starts with, and the archetype's instance type.
#[repr(C)]
pub struct Object {
    class: Option<&'static Class>,
    interface: InterfaceSlot<ObjectInterface>,
    reference_count: AtomicUsize,
}

/// Where the header's interface slot sits within every instance.
pub(crate) const HEADER_INTERFACE_OFFSET: usize = offset_of!(Object, interface);

/// The archetype's interface. Every class interface starts with it.
#[repr(C)]
pub struct ObjectInterface {
    /// Creates a copy of the receiver. The default allocates a fresh
    /// instance of the same class and runs `init` on it.
    pub copy: Option<fn(&Object) -> Option<Id<Object>>>,

    /// Frees what the receiver's class introduced, then chains to the
    /// superclass's `dealloc`. The archetype's version frees the block.
    pub dealloc: Option<unsafe fn(NonNull<Object>)>,

    /// Human readable description. Defaults to `Name@0xADDR`.
    pub description: Option<fn(&Object) -> String>,

    /// Hash consistent with `is_equal`. Defaults to the address.
    pub hash: Option<fn(&Object) -> u64>,

    /// Initializes a freshly allocated instance; `false` means failure.
    pub init: Option<fn(&mut Object) -> bool>,

    /// Equality. Defaults to identity.
    pub is_equal: Option<fn(&Object, &Object) -> bool>,

    /// Non-fatal type check.
    pub is_kind_of_class: Option<fn(&Object, &Class) -> bool>,
}

// SAFETY: repr(C), no superclass, every field is an Option<fn>
unsafe impl Interface for ObjectInterface {}

/// The archetype class every class descends from.
pub static OBJECT_CLASS: Class = Class::new(ClassDef {
    name: "Object",
    superclass: None,
    instance: Layout::new::<Object>(),
    interface: Layout::new::<ObjectInterface>(),
    interface_offset: HEADER_INTERFACE_OFFSET,
    initialize: Some(initialize),
    destroy: None,
});

fn initialize(block: &mut InterfaceBlock) {
    let interface = block.get_mut::<ObjectInterface>();

    interface.copy = Some(copy);
    interface.dealloc = Some(dealloc);
    interface.description = Some(description);
    interface.hash = Some(hash);
    interface.init = Some(init);
    interface.is_equal = Some(is_equal);
    interface.is_kind_of_class = Some(is_kind_of_class);
}

fn copy(this: &Object) -> Option<Id<Object>> {
    // SAFETY: alloc() returns a fresh instance carrying one reference
    let copy = unsafe { Id::from_raw(alloc(this.class())) };
    Id::initialized(copy)
}

unsafe fn dealloc(object: NonNull<Object>) {
    // SAFETY: the caller hands over the last reference to a live instance
    let class = unsafe { object.as_ref() }.class();
    trace!("dealloc {}@{:p}", class.name(), object);
    // SAFETY: allocated by alloc() with the concrete class's layout
    unsafe { alloc::dealloc(object.as_ptr().cast(), class.instance_layout()) };
}

fn description(this: &Object) -> String {
    format!("{}@{:p}", this.class().name(), this)
}

fn hash(this: &Object) -> u64 {
    ptr::from_ref(this) as usize as u64
}

fn init(_this: &mut Object) -> bool {
    true
}

fn is_equal(this: &Object, other: &Object) -> bool {
    ptr::eq(this, other)
}

fn is_kind_of_class(this: &Object, class: &Class) -> bool {
    this.class().is_subclass_of(class)
}

/// A type laid out as an instance of some class.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` and either be [`Object`] itself or have
/// `Super` as their first field. [`Instance::class`] must return the class
/// whose `instance` layout is `Layout::new::<Self>()` and whose interface slot
/// is an `InterfaceSlot<Self::Interface>`. The all-zero bit pattern must be a
/// valid value of every field, since the allocator hands out zeroed memory
/// (use `Option<Box<_>>`, `Option<Id<_>>`, integers, atomics, ...).
pub unsafe trait Instance: Sized + Send + Sync + 'static {
    /// This class's interface struct.
    type Interface: Interface;

    /// The superclass's instance type (`Object` for the archetype itself).
    type Super: Instance;

    /// The class describing this type.
    fn class() -> &'static Class;

    /// The header at the start of this instance.
    fn as_object(&self) -> &Object {
        // SAFETY: repr(C) with the header at offset 0
        unsafe { &*ptr::from_ref(self).cast::<Object>() }
    }

    /// This class's interface slot, which points at the concrete class's
    /// interface.
    fn interface(&self) -> &'static Self::Interface {
        let offset = Self::class().interface_offset();
        // SAFETY: the slot for Self::class() lives at that offset
        let slot = unsafe {
            &*ptr::from_ref(self)
                .cast::<u8>()
                .add(offset)
                .cast::<InterfaceSlot<Self::Interface>>()
        };
        slot.get()
    }

    /// The superclass's own interface, for "super" calls.
    ///
    /// # Panics
    ///
    /// Panics for the archetype, which has no superclass.
    fn super_interface() -> &'static <Self::Super as Instance>::Interface {
        let class = Self::class();
        match class.superclass() {
            Some(superclass) => superclass.interface(),
            None => fatal!("Class {} has no superclass to dispatch to", class.name()),
        }
    }
}

// SAFETY: Object is the header itself
unsafe impl Instance for Object {
    type Interface = ObjectInterface;
    type Super = Object;

    fn class() -> &'static Class {
        &OBJECT_CLASS
    }
}

impl Object {
    /// The concrete class this instance was allocated as.
    #[must_use]
    pub fn class(&self) -> &'static Class {
        match self.class {
            Some(class) => class,
            None => fatal!("Object at {:p} was not allocated by the runtime", self),
        }
    }

    /// Current reference count; may change concurrently.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        self.reference_count.load(Ordering::Acquire)
    }

    /// Views this instance as `T`.
    ///
    /// # Panics
    ///
    /// Panics if the instance is not a kind of `T`'s class.
    #[must_use]
    pub fn cast<T: Instance>(&self) -> &T {
        cast(T::class(), self);
        // SAFETY: the instance is a T (or a subclass whose layout starts
        // with a T)
        unsafe { &*ptr::from_ref(self).cast::<T>() }
    }

    /// Mutable view of this instance as `T`.
    ///
    /// # Panics
    ///
    /// Panics if the instance is not a kind of `T`'s class.
    #[must_use]
    pub fn cast_mut<T: Instance>(&mut self) -> &mut T {
        cast(T::class(), self);
        // SAFETY: as in cast()
        unsafe { &mut *ptr::from_mut(self).cast::<T>() }
    }

    /// Views this instance as `T` if it is a kind of `T`'s class.
    #[must_use]
    pub fn downcast_ref<T: Instance>(&self) -> Option<&T> {
        if is_kind_of(T::class(), self) {
            // SAFETY: checked above
            Some(unsafe { &*ptr::from_ref(self).cast::<T>() })
        } else {
            None
        }
    }

    /// Like [`Object::downcast_ref`], reporting the mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompatibleClass`] naming both classes.
    pub fn try_cast<T: Instance>(&self) -> Result<&T> {
        self.downcast_ref::<T>().ok_or_else(|| Error::IncompatibleClass {
            instance: self.class().name(),
            target: T::class().name(),
        })
    }

    /// Virtual, non-fatal type check.
    #[must_use]
    pub fn is_kind_of_class(&self, class: &Class) -> bool {
        crate::invoke!(self, is_kind_of_class, class)
    }

    /// Virtual description.
    #[must_use]
    pub fn description(&self) -> String {
        crate::invoke!(self, description)
    }

    /// Virtual hash.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        crate::invoke!(self, hash)
    }

    /// Virtual equality.
    #[must_use]
    pub fn is_equal(&self, other: &Object) -> bool {
        crate::invoke!(self, is_equal, other)
    }

    /// Virtual copy; `None` if the copy failed to initialize.
    #[must_use]
    pub fn copy(&self) -> Option<Id<Object>> {
        crate::invoke!(self, copy)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class().name())
            .field("reference_count", &self.reference_count())
            .finish()
    }
}

/// Allocates a zeroed instance of `class` with a reference count of 1.
///
/// Realizes the class first, stamps the header and wires every ancestor's
/// interface slot to `class`'s interface. Field initialization is left to the
/// caller. Out of memory aborts.
#[must_use]
pub fn alloc(class: &'static Class) -> NonNull<Object> {
    class.initialize();

    let layout = class.instance_layout();
    // SAFETY: validate() guarantees the layout holds at least a header
    let raw = unsafe { alloc::alloc_zeroed(layout) };
    let Some(block) = NonNull::new(raw) else {
        alloc::handle_alloc_error(layout)
    };

    let interface = class.interface_ptr().as_ptr().cast_const();
    for ancestor in class.ancestors() {
        // SAFETY: validate() checked each offset is aligned and in bounds of
        // the ancestor's layout, which the concrete layout contains
        unsafe {
            block
                .as_ptr()
                .add(ancestor.interface_offset())
                .cast::<*const u8>()
                .write(interface);
        }
    }

    let object = block.cast::<Object>();
    // SAFETY: fresh, zeroed, suitably aligned block
    unsafe {
        ptr::addr_of_mut!((*object.as_ptr()).class).write(Some(class));
        ptr::addr_of_mut!((*object.as_ptr()).reference_count).write(AtomicUsize::new(1));
    }

    trace!("alloc {}@{:p}", class.name(), object);
    object
}

/// Checks that `object` is a kind of `class` and returns it.
///
/// Casting to the archetype always succeeds.
///
/// # Panics
///
/// Panics if the instance's class chain does not contain `class`, or if an
/// unrealized class is found on the chain.
pub fn cast<'a>(class: &Class, object: &'a Object) -> &'a Object {
    let mut current = Some(object.class());
    while let Some(candidate) = current {
        if !candidate.is_initialized() {
            fatal!(
                "Class {} of instance {:p} is not initialized",
                candidate.name(),
                object
            );
        }
        if ptr::eq(candidate, class) || class.is_root() {
            return object;
        }
        current = candidate.superclass();
    }
    fatal!(
        "Cannot cast instance of {} to {}",
        object.class().name(),
        class.name()
    )
}

/// Non-fatal counterpart of [`cast`].
#[must_use]
pub fn is_kind_of(class: &Class, object: &Object) -> bool {
    object.class().is_subclass_of(class)
}

/// Adds a reference to `object`.
///
/// Pair with [`release`], or take ownership through [`Id`] instead.
pub fn retain(object: &Object) {
    let object = cast(&OBJECT_CLASS, object);
    let previous = object.reference_count.fetch_add(1, Ordering::Relaxed);

    if previous > isize::MAX as usize {
        error!(
            "reference count overflow on {}@{:p}",
            object.class().name(),
            object
        );
        std::process::abort();
    }
}

/// Drops a reference to `object`, running its `dealloc` chain if it was the
/// last one.
///
/// # Safety
///
/// `object` must point to a live instance and the caller must own one of its
/// references, which this call consumes.
pub unsafe fn release(object: NonNull<Object>) {
    let dealloc = {
        // SAFETY: live instance, per the caller
        let this = cast(&OBJECT_CLASS, unsafe { object.as_ref() });

        let previous = this.reference_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous != 0, "release of a dead instance");
        if previous != 1 {
            return;
        }
        atomic::fence(Ordering::Acquire);

        match this.interface().dealloc {
            Some(dealloc) => dealloc,
            None => fatal!("Class {} does not implement dealloc", this.class().name()),
        }
    };

    // SAFETY: we held the last reference
    unsafe { dealloc(object) };
}

/// Chains a `dealloc` override to `T`'s superclass.
///
/// Call this as the last step of `T`'s own `dealloc`, after freeing what `T`
/// introduced.
///
/// # Safety
///
/// Same contract as `dealloc` itself: `object` is a dying instance of `T`
/// (or a subclass) whose reference count reached zero.
pub unsafe fn super_dealloc<T: Instance>(object: NonNull<Object>) {
    match T::super_interface().as_object_interface().dealloc {
        // SAFETY: forwarded from the caller
        Some(dealloc) => unsafe { dealloc(object) },
        None => fatal!(
            "Superclass of {} does not implement dealloc",
            T::class().name()
        ),
    }
}

/// Upcast of any interface to the archetype's interface.
pub trait AsObjectInterface {
    /// The archetype prefix of this interface.
    fn as_object_interface(&self) -> &ObjectInterface;
}

impl<I: Interface> AsObjectInterface for I {
    fn as_object_interface(&self) -> &ObjectInterface {
        // SAFETY: every Interface starts with ObjectInterface
        unsafe { &*ptr::from_ref(self).cast::<ObjectInterface>() }
    }
}
