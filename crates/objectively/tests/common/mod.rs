// Shared fixtures for the integration tests.
//
// A three level hierarchy under the archetype:
//
//   Object <- Root <- Mid <- Leaf
//
// Root declares `describe`, Mid overrides it and adds `value`, Leaf overrides
// `describe` again and calls up to Mid's version. Every level overrides
// `dealloc`, records itself in the instance's journal and chains to its
// superclass, so tests can observe the dealloc order.

#![allow(dead_code)]

use objectively::runtime::{
    Class, ClassDef, Id, Instance, Interface, InterfaceBlock, InterfaceSlot, OBJECT_CLASS, Object,
    ObjectInterface, super_dealloc,
};
use objectively::{invoke, invoke_super};
use std::alloc::Layout;
use std::mem::offset_of;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::Mutex;

/// Records which dealloc overrides ran, in order.
pub type Journal = Mutex<Vec<&'static str>>;

/// A journal that lives for the rest of the test binary.
pub fn journal() -> &'static Journal {
    Box::leak(Box::new(Mutex::new(Vec::new())))
}

pub fn entries(journal: &Journal) -> Vec<&'static str> {
    journal.lock().unwrap().clone()
}

fn record(journal: Option<&'static Journal>, entry: &'static str) {
    if let Some(journal) = journal {
        journal.lock().unwrap().push(entry);
    }
}

// ============================================================================
// Root
// ============================================================================

#[repr(C)]
pub struct Root {
    pub object: Object,
    pub interface: InterfaceSlot<RootInterface>,
    pub journal: Option<&'static Journal>,
}

#[repr(C)]
pub struct RootInterface {
    pub object: ObjectInterface,
    pub describe: Option<fn(&Root) -> String>,
}

unsafe impl Interface for RootInterface {}

impl Deref for RootInterface {
    type Target = ObjectInterface;

    fn deref(&self) -> &ObjectInterface {
        &self.object
    }
}

unsafe impl Instance for Root {
    type Interface = RootInterface;
    type Super = Object;

    fn class() -> &'static Class {
        &ROOT_CLASS
    }
}

impl Deref for Root {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.object
    }
}

pub static ROOT_CLASS: Class = Class::new(ClassDef {
    name: "Root",
    superclass: Some(&OBJECT_CLASS),
    instance: Layout::new::<Root>(),
    interface: Layout::new::<RootInterface>(),
    interface_offset: offset_of!(Root, interface),
    initialize: Some(root_initialize),
    destroy: None,
});

fn root_initialize(block: &mut InterfaceBlock) {
    let interface = block.get_mut::<RootInterface>();
    interface.object.dealloc = Some(root_dealloc);
    interface.describe = Some(root_describe);
}

fn root_describe(_this: &Root) -> String {
    "Root".to_owned()
}

unsafe fn root_dealloc(object: NonNull<Object>) {
    let this = unsafe { object.cast::<Root>().as_ref() };
    record(this.journal, "Root");
    unsafe { super_dealloc::<Root>(object) };
}

impl Root {
    pub fn new(journal: &'static Journal) -> Option<Id<Root>> {
        Id::new_with(|this: &mut Root| {
            this.journal = Some(journal);
            true
        })
    }

    pub fn describe(&self) -> String {
        invoke!(self, describe)
    }
}

// ============================================================================
// Mid
// ============================================================================

#[repr(C)]
pub struct Mid {
    pub root: Root,
    pub interface: InterfaceSlot<MidInterface>,
    pub value: i64,
}

#[repr(C)]
pub struct MidInterface {
    pub root: RootInterface,
    pub value: Option<fn(&Mid) -> i64>,
}

unsafe impl Interface for MidInterface {}

impl Deref for MidInterface {
    type Target = RootInterface;

    fn deref(&self) -> &RootInterface {
        &self.root
    }
}

unsafe impl Instance for Mid {
    type Interface = MidInterface;
    type Super = Root;

    fn class() -> &'static Class {
        &MID_CLASS
    }
}

impl Deref for Mid {
    type Target = Root;

    fn deref(&self) -> &Root {
        &self.root
    }
}

pub static MID_CLASS: Class = Class::new(ClassDef {
    name: "Mid",
    superclass: Some(&ROOT_CLASS),
    instance: Layout::new::<Mid>(),
    interface: Layout::new::<MidInterface>(),
    interface_offset: offset_of!(Mid, interface),
    initialize: Some(mid_initialize),
    destroy: None,
});

fn mid_initialize(block: &mut InterfaceBlock) {
    let interface = block.get_mut::<MidInterface>();
    interface.root.object.dealloc = Some(mid_dealloc);
    interface.root.describe = Some(mid_describe);
    interface.value = Some(mid_value);
}

fn mid_describe(this: &Root) -> String {
    format!("Mid({})", this.cast::<Mid>().value)
}

fn mid_value(this: &Mid) -> i64 {
    this.value
}

unsafe fn mid_dealloc(object: NonNull<Object>) {
    let this = unsafe { object.cast::<Mid>().as_ref() };
    record(this.journal, "Mid");
    unsafe { super_dealloc::<Mid>(object) };
}

impl Mid {
    pub fn new(value: i64, journal: &'static Journal) -> Option<Id<Mid>> {
        Id::new_with(|this: &mut Mid| {
            this.root.journal = Some(journal);
            this.value = value;
            true
        })
    }

    pub fn value(&self) -> i64 {
        invoke!(self, value)
    }
}

// ============================================================================
// Leaf
// ============================================================================

#[repr(C)]
pub struct Leaf {
    pub mid: Mid,
    pub interface: InterfaceSlot<LeafInterface>,
    pub name: Option<Box<str>>,
}

#[repr(C)]
pub struct LeafInterface {
    pub mid: MidInterface,
}

unsafe impl Interface for LeafInterface {}

impl Deref for LeafInterface {
    type Target = MidInterface;

    fn deref(&self) -> &MidInterface {
        &self.mid
    }
}

unsafe impl Instance for Leaf {
    type Interface = LeafInterface;
    type Super = Mid;

    fn class() -> &'static Class {
        &LEAF_CLASS
    }
}

impl Deref for Leaf {
    type Target = Mid;

    fn deref(&self) -> &Mid {
        &self.mid
    }
}

pub static LEAF_CLASS: Class = Class::new(ClassDef {
    name: "Leaf",
    superclass: Some(&MID_CLASS),
    instance: Layout::new::<Leaf>(),
    interface: Layout::new::<LeafInterface>(),
    interface_offset: offset_of!(Leaf, interface),
    initialize: Some(leaf_initialize),
    destroy: None,
});

fn leaf_initialize(block: &mut InterfaceBlock) {
    let interface = block.get_mut::<LeafInterface>();
    interface.mid.root.object.dealloc = Some(leaf_dealloc);
    interface.mid.root.describe = Some(leaf_describe);
}

fn leaf_describe(this: &Root) -> String {
    let inherited = invoke_super!(Leaf, this, describe);
    let name = this.cast::<Leaf>().name.as_deref().unwrap_or("?");
    format!("Leaf {name} over {inherited}")
}

unsafe fn leaf_dealloc(object: NonNull<Object>) {
    let this = unsafe { object.cast::<Leaf>().as_mut() };
    this.name = None;
    record(this.journal, "Leaf");
    unsafe { super_dealloc::<Leaf>(object) };
}

impl Leaf {
    pub fn new(value: i64, name: &str, journal: &'static Journal) -> Option<Id<Leaf>> {
        Id::new_with(|this: &mut Leaf| {
            this.mid.root.journal = Some(journal);
            this.mid.value = value;
            this.name = Some(name.into());
            true
        })
    }
}
