//! Error types for the `Objectively` runtime.
//!
//! Almost every failure in the runtime is a contract violation by the code
//! declaring a class, and those take the process down. The variants here
//! describe those violations so they can also be *reported* without
//! panicking, e.g. by [`Class::validate`](crate::Class::validate) or by the
//! non-fatal typed downcasts.

use std::fmt;

/// Errors that can occur in the `Objectively` runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A class was declared with an empty name.
    MissingName,

    /// A class other than the archetype was declared without a superclass.
    MissingSuperclass {
        /// The offending class.
        class: &'static str,
    },

    /// The instance layout is smaller than the `Object` header.
    InstanceTooSmall {
        /// The offending class.
        class: &'static str,
        /// Declared instance size.
        size: usize,
        /// Minimum size required.
        required: usize,
    },

    /// The interface layout is smaller than the archetype's interface.
    InterfaceTooSmall {
        /// The offending class.
        class: &'static str,
        /// Declared interface size.
        size: usize,
        /// Minimum size required.
        required: usize,
    },

    /// The instance layout shrinks (or loosens alignment) relative to the
    /// superclass.
    InstanceShrinks {
        /// The offending class.
        class: &'static str,
        /// The superclass it shrinks against.
        superclass: &'static str,
    },

    /// The interface layout shrinks (or loosens alignment) relative to the
    /// superclass.
    InterfaceShrinks {
        /// The offending class.
        class: &'static str,
        /// The superclass it shrinks against.
        superclass: &'static str,
    },

    /// The interface-pointer slot does not fit inside the instance or is not
    /// pointer aligned.
    InvalidInterfaceOffset {
        /// The offending class.
        class: &'static str,
        /// Declared slot offset.
        offset: usize,
    },

    /// Another realized class already uses this name.
    DuplicateClassName {
        /// The contested name.
        name: &'static str,
    },

    /// An instance is not a kind of the requested class.
    IncompatibleClass {
        /// Concrete class of the instance.
        instance: &'static str,
        /// Requested class.
        target: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingName => write!(f, "Class declared without a name"),
            Error::MissingSuperclass { class } => {
                write!(f, "Class {class} has no superclass")
            }
            Error::InstanceTooSmall {
                class,
                size,
                required,
            } => {
                write!(
                    f,
                    "Class {class}: instance size {size} is smaller than the {required} byte object header"
                )
            }
            Error::InterfaceTooSmall {
                class,
                size,
                required,
            } => {
                write!(
                    f,
                    "Class {class}: interface size {size} is smaller than the {required} byte root interface"
                )
            }
            Error::InstanceShrinks { class, superclass } => {
                write!(
                    f,
                    "Class {class}: instance layout is smaller than superclass {superclass}"
                )
            }
            Error::InterfaceShrinks { class, superclass } => {
                write!(
                    f,
                    "Class {class}: interface layout is smaller than superclass {superclass}"
                )
            }
            Error::InvalidInterfaceOffset { class, offset } => {
                write!(
                    f,
                    "Class {class}: interface offset {offset} is misaligned or out of bounds"
                )
            }
            Error::DuplicateClassName { name } => {
                write!(f, "Class name {name} is already registered")
            }
            Error::IncompatibleClass { instance, target } => {
                write!(f, "Instance of {instance} is not a kind of {target}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for `Objectively` runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
