//! Integration tests for class hierarchies.
//!
//! These tests validate how a three level hierarchy behaves end to end:
//! - Interface inheritance and overrides
//! - Most-derived dispatch through base-typed references
//! - Superclass calls
//! - The chained dealloc order
//! - Rejection of malformed descriptors
//!
//! Run with: `cargo test --test hierarchy_test`

mod common;

use common::{
    LEAF_CLASS, Leaf, LeafInterface, MID_CLASS, Mid, MidInterface, ROOT_CLASS, Root,
    RootInterface, entries, journal,
};
use objectively::runtime::{
    Class, ClassDef, ClassState, Id, Instance, InterfaceBlock, InterfaceSlot, OBJECT_CLASS, Object,
    ObjectInterface,
};
use objectively::{invoke, invoke_super};
use std::alloc::Layout;
use std::mem::offset_of;
use std::ops::Deref;

// ============================================================================
// Interface Inheritance
// ============================================================================

#[test]
fn test_subclass_interface_starts_with_superclass_interface() {
    let root = ROOT_CLASS.interface::<RootInterface>();
    let mid = MID_CLASS.interface::<MidInterface>();
    let leaf = LEAF_CLASS.interface::<LeafInterface>();

    // Untouched entries are copied down unchanged.
    assert_eq!(
        root.object.hash.map(|f| f as usize),
        mid.root.object.hash.map(|f| f as usize)
    );
    assert_eq!(
        mid.value.map(|f| f as usize),
        leaf.mid.value.map(|f| f as usize)
    );
    assert_eq!(
        OBJECT_CLASS
            .interface::<ObjectInterface>()
            .is_equal
            .map(|f| f as usize),
        leaf.is_equal.map(|f| f as usize)
    );

    // Overrides replace the inherited entry.
    assert_ne!(
        root.describe.map(|f| f as usize),
        mid.root.describe.map(|f| f as usize)
    );
    assert_ne!(
        mid.root.describe.map(|f| f as usize),
        leaf.describe.map(|f| f as usize)
    );
}

#[test]
fn test_superclass_interfaces_are_unaffected_by_overrides() {
    let _leaf = Leaf::new(1, "a", journal()).unwrap();

    let root = Root::new(journal()).unwrap();
    let mid = Mid::new(7, journal()).unwrap();

    assert_eq!(root.describe(), "Root");
    assert_eq!(mid.describe(), "Mid(7)");
}

#[test]
fn test_layouts_grow_monotonically() {
    let classes: [&'static Class; 4] = [&OBJECT_CLASS, &ROOT_CLASS, &MID_CLASS, &LEAF_CLASS];
    for pair in classes.windows(2) {
        let (superclass, class) = (pair[0], pair[1]);
        assert!(class.instance_layout().size() >= superclass.instance_layout().size());
        assert!(class.interface_layout().size() >= superclass.interface_layout().size());
        assert!(class.interface_offset() >= superclass.instance_layout().size());
        assert_eq!(class.superclass(), Some(superclass));
    }

    // Leaf adds no entries of its own.
    assert_eq!(
        LEAF_CLASS.interface_layout().size(),
        MID_CLASS.interface_layout().size()
    );
}

#[test]
fn test_ancestors_walk_to_archetype() {
    let names: Vec<_> = LEAF_CLASS.ancestors().map(Class::name).collect();
    assert_eq!(names, ["Leaf", "Mid", "Root", "Object"]);
}

// ============================================================================
// Dispatch
// ============================================================================

#[test]
fn test_dispatch_reaches_most_derived_override() {
    let leaf = Leaf::new(3, "x", journal()).unwrap();

    assert_eq!(leaf.describe(), "Leaf x over Mid(3)");

    // Through a Root-typed reference, the Leaf override still runs.
    let as_root: &Root = &leaf;
    assert_eq!(as_root.describe(), "Leaf x over Mid(3)");
    assert_eq!(invoke!(as_root, describe), "Leaf x over Mid(3)");

    // Through the header, inherited archetype entries still run.
    let as_object: &Object = &leaf;
    assert!(as_object.description().starts_with("Leaf@"));
}

#[test]
fn test_every_ancestor_slot_points_at_concrete_interface() {
    let leaf = Leaf::new(0, "slots", journal()).unwrap();
    let concrete = LEAF_CLASS.interface_ptr().as_ptr() as usize;

    let slots = [
        std::ptr::from_ref(leaf.as_object().interface()) as usize,
        std::ptr::from_ref(Root::interface(&leaf)) as usize,
        std::ptr::from_ref(Mid::interface(&leaf)) as usize,
        std::ptr::from_ref(Leaf::interface(&leaf)) as usize,
    ];
    assert!(slots.iter().all(|&slot| slot == concrete));
}

#[test]
fn test_inherited_entry_dispatches_without_override() {
    let leaf = Leaf::new(42, "v", journal()).unwrap();
    assert_eq!(leaf.value(), 42);
    assert_eq!(invoke!(leaf, value), 42);
}

#[test]
fn test_super_call_uses_superclass_interface() {
    let leaf = Leaf::new(9, "s", journal()).unwrap();

    let inherited = invoke_super!(Leaf, leaf, describe);
    assert_eq!(inherited, "Mid(9)");

    let from_mid = invoke_super!(Mid, leaf, describe);
    assert_eq!(from_mid, "Root");
}

#[test]
#[should_panic(expected = "has no superclass")]
fn test_super_call_from_archetype_is_fatal() {
    let object = Id::<Object>::new().unwrap();
    let _ = invoke_super!(Object, object, description);
}

// ============================================================================
// Subclass without overrides
// ============================================================================

#[repr(C)]
struct Sprout {
    mid: Mid,
    interface: InterfaceSlot<MidInterface>,
}

unsafe impl Instance for Sprout {
    type Interface = MidInterface;
    type Super = Mid;

    fn class() -> &'static Class {
        &SPROUT_CLASS
    }
}

impl Deref for Sprout {
    type Target = Mid;

    fn deref(&self) -> &Mid {
        &self.mid
    }
}

static SPROUT_CLASS: Class = Class::new(ClassDef {
    name: "Sprout",
    superclass: Some(&MID_CLASS),
    instance: Layout::new::<Sprout>(),
    interface: Layout::new::<MidInterface>(),
    interface_offset: offset_of!(Sprout, interface),
    initialize: None,
    destroy: None,
});

#[test]
fn test_subclass_without_override_inherits_implementation() {
    let sprout = Id::<Sprout>::new_with(|this| {
        this.mid.value = 5;
        true
    })
    .unwrap();

    assert_eq!(sprout.describe(), "Mid(5)");
    assert_eq!(sprout.value(), 5);
    assert!(sprout.description().starts_with("Sprout@"));
    assert_eq!(
        SPROUT_CLASS
            .interface::<MidInterface>()
            .describe
            .map(|f| f as usize),
        MID_CLASS
            .interface::<MidInterface>()
            .describe
            .map(|f| f as usize)
    );
}

// ============================================================================
// Dealloc chain
// ============================================================================

#[test]
fn test_dealloc_runs_most_derived_first() {
    let log = journal();
    let leaf = Leaf::new(1, "gone", log).unwrap();
    let extra = leaf.clone();

    drop(leaf);
    assert!(entries(log).is_empty());

    drop(extra);
    assert_eq!(entries(log), ["Leaf", "Mid", "Root"]);
}

#[test]
fn test_dealloc_through_base_handle_still_runs_leaf_dealloc() {
    let log = journal();
    let leaf = Leaf::new(1, "base", log).unwrap();
    let object: Id<Object> = Id::into_object(leaf);

    drop(object);
    assert_eq!(entries(log), ["Leaf", "Mid", "Root"]);
}

#[test]
fn test_failed_initializer_releases_instance() {
    let log = journal();
    let leaf = Id::<Leaf>::new_with(|this| {
        this.mid.root.journal = Some(log);
        false
    });

    assert!(leaf.is_none());
    assert_eq!(entries(log), ["Leaf", "Mid", "Root"]);
}

#[test]
fn test_copy_and_equality_defaults() {
    let a = Mid::new(1, journal()).unwrap();
    let b = Mid::new(1, journal()).unwrap();

    // Identity semantics unless a class overrides them.
    assert!(a.is_equal(&a));
    assert!(!a.is_equal(&b));
    assert_ne!(a.hash_value(), b.hash_value());

    let copy = a.copy().unwrap();
    assert_eq!(copy.class(), &MID_CLASS);
    assert!(!Id::ptr_eq(&Id::into_object(a.clone()), &copy));
}

// ============================================================================
// Malformed descriptors
// ============================================================================

#[repr(C)]
struct Stunted {
    mid: Mid,
    interface: InterfaceSlot<ObjectInterface>,
}

unsafe impl Instance for Stunted {
    type Interface = ObjectInterface;
    type Super = Mid;

    fn class() -> &'static Class {
        &STUNTED_CLASS
    }
}

static STUNTED_CLASS: Class = Class::new(ClassDef {
    name: "Stunted",
    superclass: Some(&MID_CLASS),
    instance: Layout::new::<Stunted>(),
    interface: Layout::new::<ObjectInterface>(),
    interface_offset: offset_of!(Stunted, interface),
    initialize: None,
    destroy: None,
});

#[test]
#[should_panic(expected = "interface layout is smaller than superclass Mid")]
fn test_shrinking_interface_is_fatal() {
    let _ = Id::<Stunted>::alloc();
}

fn exploding_initialize(_block: &mut InterfaceBlock) {
    panic!("initializer exploded");
}

#[repr(C)]
struct Volatile {
    object: Object,
    interface: InterfaceSlot<ObjectInterface>,
}

static VOLATILE_CLASS: Class = Class::new(ClassDef {
    name: "Volatile",
    superclass: Some(&OBJECT_CLASS),
    instance: Layout::new::<Volatile>(),
    interface: Layout::new::<ObjectInterface>(),
    interface_offset: offset_of!(Volatile, interface),
    initialize: Some(exploding_initialize),
    destroy: None,
});

#[test]
fn test_panicking_initializer_poisons_class() {
    let first = std::thread::spawn(|| VOLATILE_CLASS.initialize()).join();
    assert!(first.is_err());
    assert_eq!(VOLATILE_CLASS.state(), ClassState::Poisoned);

    let again = std::thread::spawn(|| {
        let _ = objectively::runtime::alloc(&VOLATILE_CLASS);
    })
    .join();
    assert!(again.is_err());
}
