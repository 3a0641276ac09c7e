//! Method dispatch.
//!
//! Dispatch never enters the runtime proper: a call reads an interface
//! pointer out of the instance, picks a field and calls through it. The
//! macros here only spell that out and turn an unset entry into a fatal
//! "does not implement" error.
//!
//! Interfaces compose by embedding, so a subclass interface usually derefs to
//! its superclass interface and entries declared by any ancestor are reachable
//! by name:
//!
//! ```rust,ignore
//! // through the instance: reaches the most-derived override
//! let text = invoke!(leaf, describe);
//!
//! // through the superclass's own interface, from inside Leaf's override
//! let inherited = invoke_super!(Leaf, this, describe);
//! ```

use crate::runtime::class::Class;

/// Calls `method` through the receiver's interface.
///
/// The receiver may be an instance reference or anything that derefs to one
/// (such as an [`Id`](crate::runtime::Id)); it is passed on as the first
/// argument, coerced to the parameter type the entry declares.
///
/// # Panics
///
/// Panics if the entry is unset for the receiver's class.
#[macro_export]
macro_rules! invoke {
    ($receiver:expr, $method:ident $(, $arg:expr)* $(,)?) => {{
        #[allow(unused_imports)]
        use $crate::runtime::Instance as _;
        let __receiver = &*$receiver;
        match __receiver.interface().$method {
            Some(__imp) => __imp(__receiver $(, $arg)*),
            None => $crate::runtime::dispatch::unimplemented(
                __receiver.as_object().class(),
                stringify!($method),
            ),
        }
    }};
}

/// Calls `method` through the interface of `$class`'s superclass.
///
/// This is how an override reaches the implementation it replaced.
///
/// # Panics
///
/// Panics if the superclass leaves the entry unset, or if `$class` is the
/// archetype.
#[macro_export]
macro_rules! invoke_super {
    ($class:ty, $receiver:expr, $method:ident $(, $arg:expr)* $(,)?) => {{
        let __receiver = &*$receiver;
        match <$class as $crate::runtime::Instance>::super_interface().$method {
            Some(__imp) => __imp(__receiver $(, $arg)*),
            None => $crate::runtime::dispatch::unimplemented(
                <<$class as $crate::runtime::Instance>::Super as $crate::runtime::Instance>::class(),
                stringify!($method),
            ),
        }
    }};
}

#[doc(hidden)]
#[cold]
#[track_caller]
pub fn unimplemented(class: &Class, method: &str) -> ! {
    fatal!("Class {} does not implement {}", class.name(), method)
}
