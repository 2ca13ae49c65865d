//! Object heap of the memory engine.

use std::{
    collections::HashMap,
    fmt::Write as _,
    path::{Path, PathBuf},
};

use engine_bridge_core::{ObjectId, OutputStore, Primitive, RemoteFault, protocol::WireValue};

/// Class name of plain records created by `struct(...)`.
pub const STRUCT_CLASS: &str = "struct";

/// A value stored in the engine's workspace or in an object field.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Primitive(Primitive),
    /// Reference to a heap object. Copying the slot aliases the object.
    Object(ObjectId),
    Fault(RemoteFault),
}

impl Slot {
    #[must_use]
    pub const fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Self::Primitive(p) => Some(p),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Primitive(Primitive::Text(s)) => Some(s),
            _ => None,
        }
    }
}

macro_rules! slot_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Slot {
                fn from(v: $ty) -> Self {
                    Self::Primitive(v.into())
                }
            }
        )*
    };
}

slot_from!(Primitive, bool, i32, i64, f64, &str, String);

#[derive(Debug, Clone)]
pub(crate) struct Object {
    class: String,
    /// Insertion-ordered fields.
    fields: Vec<(String, Slot)>,
}

#[derive(Debug)]
pub(crate) struct Heap {
    objects: HashMap<ObjectId, Object>,
    next_id: ObjectId,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    pub(crate) fn alloc(&mut self, class: &str) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(
            id,
            Object {
                class: class.to_string(),
                fields: Vec::new(),
            },
        );
        id
    }

    pub(crate) fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub(crate) fn class_of(&self, id: ObjectId) -> Option<&str> {
        self.objects.get(&id).map(|o| o.class.as_str())
    }

    pub(crate) fn field(&self, id: ObjectId, name: &str) -> Result<Slot, RemoteFault> {
        let object = self.objects.get(&id).ok_or_else(deleted_object)?;
        object
            .fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                RemoteFault::new(format!(
                    "Unrecognized field name \"{name}\" for class '{}'.",
                    object.class
                ))
                .with_identifier("Engine:nonExistentField")
            })
    }

    pub(crate) fn set_field(&mut self, id: ObjectId, name: &str, value: Slot) -> Result<(), RemoteFault> {
        let object = self.objects.get_mut(&id).ok_or_else(deleted_object)?;
        match object.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => object.fields.push((name.to_string(), value)),
        }
        Ok(())
    }

    pub(crate) fn to_wire(&self, slot: &Slot) -> WireValue {
        match slot {
            Slot::Primitive(p) => p.into(),
            Slot::Object(id) => WireValue::Object {
                id: *id,
                class: self.class_of(*id).unwrap_or(STRUCT_CLASS).to_string(),
            },
            Slot::Fault(f) => WireValue::Error {
                message: f.message.clone(),
                identifier: f.identifier.clone(),
            },
        }
    }

    pub(crate) fn from_wire(&self, wire: WireValue) -> Result<Slot, RemoteFault> {
        Ok(match wire {
            WireValue::Empty => Slot::Primitive(Primitive::Empty),
            WireValue::Bool { value } => value.into(),
            WireValue::Integer { value } => value.into(),
            WireValue::Number { value } => value.into(),
            WireValue::Text { value } => value.into(),
            WireValue::Object { id, .. } => {
                if !self.contains(id) {
                    return Err(deleted_object());
                }
                Slot::Object(id)
            }
            WireValue::Error {
                message,
                identifier,
            } => Slot::Fault(RemoteFault {
                message,
                identifier,
            }),
        })
    }

    /// Text printed by `disp`.
    pub(crate) fn render(&self, slot: &Slot) -> String {
        match slot {
            Slot::Primitive(Primitive::Empty) => String::new(),
            Slot::Primitive(p) => format!("{p}\n"),
            Slot::Fault(f) => format!("{f}\n"),
            Slot::Object(id) => {
                let Some(object) = self.objects.get(id) else {
                    return "  handle to deleted object\n".to_string();
                };
                let mut out = String::new();
                if object.class != STRUCT_CLASS {
                    let _ = writeln!(out, "  {} with properties:\n", object.class);
                }
                let width = object.fields.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
                for (name, value) in &object.fields {
                    let _ = writeln!(out, "    {name:>width$}: {}", self.summary(value));
                }
                out
            }
        }
    }

    /// One-line summary of a field value.
    fn summary(&self, slot: &Slot) -> String {
        match slot {
            Slot::Primitive(Primitive::Text(s)) => format!("'{s}'"),
            Slot::Primitive(p) => p.to_string(),
            Slot::Object(id) => format!("[1×1 {}]", self.class_of(*id).unwrap_or(STRUCT_CLASS)),
            Slot::Fault(_) => "[1×1 MException]".to_string(),
        }
    }
}

fn deleted_object() -> RemoteFault {
    RemoteFault::new("Invalid or deleted object.").with_identifier("Engine:class:InvalidHandle")
}

/// What a native function sees of the engine while it runs.
pub struct EngineScope<'a> {
    pub(crate) heap: &'a mut Heap,
    pub(crate) cwd: &'a Path,
    pub(crate) output: &'a OutputStore,
}

impl EngineScope<'_> {
    /// Allocate an empty object of `class`.
    pub fn new_object(&mut self, class: &str) -> Slot {
        Slot::Object(self.heap.alloc(class))
    }

    /// Read a field of an object.
    ///
    /// # Errors
    /// Fails if `target` is not an object or has no such field.
    pub fn field(&self, target: &Slot, name: &str) -> Result<Slot, RemoteFault> {
        self.heap.field(object_id(target)?, name)
    }

    /// Set a field in place. Every alias of the object observes the change.
    ///
    /// # Errors
    /// Fails if `target` is not an object.
    pub fn set_field(&mut self, target: &Slot, name: &str, value: Slot) -> Result<(), RemoteFault> {
        self.heap.set_field(object_id(target)?, name, value)
    }

    /// Engine class name of a value.
    #[must_use]
    pub fn class_of(&self, slot: &Slot) -> String {
        match slot {
            Slot::Primitive(Primitive::Text(_)) => "char".to_string(),
            Slot::Primitive(Primitive::Bool(_)) => "logical".to_string(),
            Slot::Primitive(Primitive::Integer(_)) => "int64".to_string(),
            Slot::Primitive(Primitive::Number(_) | Primitive::Empty) => "double".to_string(),
            Slot::Object(id) => self.heap.class_of(*id).unwrap_or(STRUCT_CLASS).to_string(),
            Slot::Fault(_) => "MException".to_string(),
        }
    }

    /// Engine working directory.
    #[must_use]
    pub const fn working_dir(&self) -> &Path {
        self.cwd
    }

    /// Resolve a path against the engine working directory.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        self.cwd.join(path)
    }

    /// Write display text to the engine's output stream.
    pub fn print(&self, text: impl Into<String>) {
        self.output.push_stdout(text);
    }

    /// Render a value the way `disp` does.
    #[must_use]
    pub fn render(&self, slot: &Slot) -> String {
        self.heap.render(slot)
    }
}

fn object_id(slot: &Slot) -> Result<ObjectId, RemoteFault> {
    match slot {
        Slot::Object(id) => Ok(*id),
        _ => Err(RemoteFault::new("Dot indexing is not supported for variables of this type.")
            .with_identifier("Engine:structRefFromNonStruct")),
    }
}
