//! `Objectively` runtime module.
//!
//! This module provides the class/object runtime:
//!
//! - [`class`]: class descriptors and lazy, thread-safe interface realization
//! - [`registry`]: the registry of realized classes and process teardown
//! - [`object`]: the archetype class, allocation, casts and reference counting
//! - [`id`]: the owned `Id<T>` handle
//! - [`dispatch`]: `invoke!` / `invoke_super!`
//!
//! # Example
//!
//! ```rust
//! use objectively::runtime::{Id, Object, OBJECT_CLASS};
//!
//! let object = Id::<Object>::new().unwrap();
//! assert!(object.is_kind_of_class(&OBJECT_CLASS));
//! assert!(OBJECT_CLASS.is_initialized());
//! ```

/// Reports a contract violation and panics.
///
/// The panic unwinds like any other: it can be caught with
/// `std::panic::catch_unwind` or observed through `JoinHandle::join`, and a
/// class whose realization it interrupts is left poisoned. Build with
/// `panic = "abort"` to make violations terminate the process instead.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        objectively_log::error!("{message}");
        panic!("{message}")
    }};
}

pub mod class;
pub mod dispatch;
pub mod id;
pub mod object;
pub mod registry;

pub use class::{CLASS_MAGIC, Class, ClassDef, ClassState, Interface, InterfaceBlock};
pub use id::Id;
pub use object::{
    AsObjectInterface, Instance, InterfaceSlot, OBJECT_CLASS, Object, ObjectInterface, alloc,
    cast, is_kind_of, release, retain, super_dealloc,
};
pub use registry::{class_for_name, registered_classes, teardown};
