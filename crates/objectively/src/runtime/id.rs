//! `Id<T>`: an owned, reference-counted handle to an instance.
//!
//! `Id` is the safe face of [`retain`](crate::runtime::object::retain) and
//! [`release`](crate::runtime::object::release): cloning retains, dropping
//! releases, and releasing the last handle runs the instance's most-derived
//! `dealloc`, which chains up through every superclass.
//!
//! # Example
//!
//! ```rust
//! use objectively::runtime::{Id, Object};
//!
//! let object = Id::<Object>::new().unwrap();
//! let other = object.clone();
//!
//! assert_eq!(Id::reference_count(&object), 2);
//! drop(other);
//! assert_eq!(Id::reference_count(&object), 1);
//! ```

use crate::error::{Error, Result};
use crate::runtime::object::{self, Instance, Object};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::ptr::NonNull;

/// A strong reference to an instance of `T` (or of a subclass of `T`).
///
/// `Option<Id<T>>` is pointer sized and all-zero means `None`, so it can be
/// used as an instance field.
#[repr(transparent)]
pub struct Id<T: Instance> {
    ptr: NonNull<T>,
    marker: PhantomData<T>,
}

// SAFETY: the count is atomic and T: Instance is Send + Sync
unsafe impl<T: Instance> Send for Id<T> {}
unsafe impl<T: Instance> Sync for Id<T> {}

impl<T: Instance> Id<T> {
    /// Allocates a zeroed instance of `T`'s class.
    ///
    /// Fields are left zeroed; no initializer runs.
    #[must_use]
    pub fn alloc() -> Self {
        // SAFETY: alloc() hands over the instance's only reference
        unsafe { Self::from_raw(object::alloc(T::class()).cast()) }
    }

    /// Allocates an instance and runs the virtual `init`.
    ///
    /// Returns `None` (after releasing the instance) if `init` fails.
    #[must_use]
    pub fn new() -> Option<Self> {
        Self::initialized(Self::alloc())
    }

    /// Allocates an instance and initializes it with `init`.
    ///
    /// Returns `None` (after releasing the instance, which runs its
    /// `dealloc` chain) if `init` returns `false`.
    pub fn new_with(init: impl FnOnce(&mut T) -> bool) -> Option<Self> {
        let mut this = Self::alloc();
        // SAFETY: freshly allocated, nobody else holds a reference
        let fresh = unsafe { this.ptr.as_mut() };
        init(fresh).then_some(this)
    }

    pub(crate) fn initialized(this: Self) -> Option<Self> {
        let init = this.as_object().interface().init;
        // SAFETY: freshly allocated, nobody else holds a reference
        let fresh = unsafe { this.ptr.cast::<Object>().as_mut() };
        match init {
            Some(init) => init(fresh).then_some(this),
            None => fatal!("Class {} does not implement init", fresh.class().name()),
        }
    }

    /// Takes a new strong reference to an instance borrowed from elsewhere.
    #[must_use]
    pub fn retain(instance: &T) -> Self {
        object::retain(instance.as_object());
        Id {
            ptr: NonNull::from(instance),
            marker: PhantomData,
        }
    }

    /// Current reference count of the instance.
    #[must_use]
    pub fn reference_count(this: &Self) -> usize {
        this.as_object().reference_count()
    }

    /// Mutable access when this is the only reference.
    #[must_use]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if Self::reference_count(this) == 1 {
            // SAFETY: unique, and the acquire load above synchronized with
            // every earlier release
            Some(unsafe { this.ptr.as_mut() })
        } else {
            None
        }
    }

    /// Whether both handles point at the same instance.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Raw pointer to the instance.
    #[must_use]
    pub fn as_ptr(this: &Self) -> NonNull<T> {
        this.ptr
    }

    /// Gives up the handle without releasing it.
    #[must_use]
    pub fn into_raw(this: Self) -> NonNull<T> {
        let ptr = this.ptr;
        mem::forget(this);
        ptr
    }

    /// Rebuilds a handle from [`Id::into_raw`] or a fresh allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live instance that is a kind of `T`'s class,
    /// and the caller must own one of its references, which the handle
    /// takes over.
    #[must_use]
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        Id {
            ptr,
            marker: PhantomData,
        }
    }

    /// Forgets the static type, keeping the reference.
    #[must_use]
    pub fn into_object(this: Self) -> Id<Object> {
        // SAFETY: every instance is a kind of Object; reference moves over
        unsafe { Id::from_raw(Self::into_raw(this).cast()) }
    }

    /// Converts to a handle of type `U`.
    ///
    /// # Panics
    ///
    /// Panics if the instance is not a kind of `U`'s class.
    #[must_use]
    pub fn cast<U: Instance>(this: Self) -> Id<U> {
        object::cast(U::class(), this.as_object());
        // SAFETY: checked above; reference moves over
        unsafe { Id::from_raw(Self::into_raw(this).cast()) }
    }

    /// Converts to a handle of type `U`, handing the original back on
    /// mismatch.
    ///
    /// # Errors
    ///
    /// Returns `Err(this)` if the instance is not a kind of `U`'s class.
    pub fn downcast<U: Instance>(this: Self) -> std::result::Result<Id<U>, Self> {
        if object::is_kind_of(U::class(), this.as_object()) {
            // SAFETY: checked above; reference moves over
            Ok(unsafe { Id::from_raw(Self::into_raw(this).cast()) })
        } else {
            Err(this)
        }
    }

    /// Like [`Id::downcast`], reporting the mismatch as an [`Error`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompatibleClass`]; the handle is released.
    pub fn try_cast<U: Instance>(this: Self) -> Result<Id<U>> {
        Self::downcast(this).map_err(|this| Error::IncompatibleClass {
            instance: this.as_object().class().name(),
            target: U::class().name(),
        })
    }
}

impl<T: Instance> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::retain(self)
    }
}

impl<T: Instance> Drop for Id<T> {
    fn drop(&mut self) {
        // SAFETY: the handle owns one reference
        unsafe { object::release(self.ptr.cast()) };
    }
}

impl<T: Instance> Deref for Id<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: live while we hold a reference
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Instance> AsRef<Object> for Id<T> {
    fn as_ref(&self) -> &Object {
        self.as_object()
    }
}

impl<T: Instance> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_object().is_equal(other.as_object())
    }
}

impl<T: Instance> Eq for Id<T> {}

impl<T: Instance> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.as_object().hash_value());
    }
}

impl<T: Instance> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_object().description())
    }
}

impl<T: Instance> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_object().description())
    }
}
