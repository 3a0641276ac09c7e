//! `Objectively`: a single-inheritance object runtime.
//!
//! Every type in an `Objectively` hierarchy has three parts:
//!
//! - an **instance** struct, `#[repr(C)]`, starting with its superclass's
//!   instance struct (ultimately the [`Object`] header),
//! - an **interface** struct of `Option<fn ..>` entries, starting with its
//!   superclass's interface (a hand-written virtual table),
//! - a static [`Class`] descriptor tying the two together.
//!
//! The runtime realizes each class lazily and exactly once (copying the
//! superclass's interface, then letting the class override entries),
//! allocates instances with every interface slot wired, checks casts, and
//! reference counts instances, running the override-chained `dealloc` when the
//! last reference goes away.
//!
//! # Architecture
//!
//! - **Descriptor layer**: [`Class`], [`ClassDef`], [`Interface`]
//! - **Instance layer**: [`Object`], [`Instance`], [`Id`]
//! - **Process layer**: [`runtime::registry`], including an explicit
//!   [`teardown`]
//!
//! # Contract violations
//!
//! Misuse the runtime cannot recover from (a malformed class descriptor, a
//! cyclic or duplicate class, an invalid cast, a missing interface entry) is
//! logged at error level and then panics. The panic unwinds, so it can be
//! caught, and a class whose realization panicked is
//! [`ClassState::Poisoned`] from then on. Nothing aborts the process unless
//! the build sets `panic = "abort"`.
//!
//! # Example
//!
//! ```rust
//! use objectively::{Id, Object, invoke};
//!
//! let object = Id::<Object>::new().unwrap();
//! let description = invoke!(object, description);
//!
//! assert!(description.starts_with("Object@"));
//! ```

pub mod error;
pub mod runtime;

// Re-export commonly used types
pub use error::{Error, Result};
pub use runtime::{
    Class, ClassDef, ClassState, Id, Instance, Interface, InterfaceBlock, InterfaceSlot,
    OBJECT_CLASS, Object, ObjectInterface, class_for_name, registered_classes, teardown,
};
