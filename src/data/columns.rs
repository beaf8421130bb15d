//! Type-erased data columns owned by a distributed storage.
//!
//! Each registered handle corresponds to one `Column<T>`: a name, a kind
//! mask, the user's `PrimitiveDataHandling`, and one instance per matching
//! local primitive. Columns live behind `Rc` so accessors can hand out
//! entries without keeping the registry borrowed; entries live behind
//! per-primitive `RefCell`s so distinct primitives can be mutated
//! independently during sweeps.

use crate::data::handle::{Persistence, PrimitiveDataHandling};
use crate::grid_error::GridError;
use crate::primitives::{KindMask, Primitive, PrimitiveId};
use hashbrown::HashMap;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) struct Column<T: 'static> {
    name: String,
    kinds: KindMask,
    handling: Box<dyn PrimitiveDataHandling<T>>,
    entries: RefCell<HashMap<PrimitiveId, Rc<RefCell<T>>>>,
}

impl<T: 'static> Column<T> {
    pub(crate) fn new(
        name: impl Into<String>,
        kinds: KindMask,
        handling: Box<dyn PrimitiveDataHandling<T>>,
    ) -> Self {
        Column {
            name: name.into(),
            kinds,
            handling,
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Shared handle to the instance attached to `id`.
    ///
    /// # Panics
    /// Panics if no instance exists, i.e. the primitive is not local or its
    /// kind is outside the column's mask.
    pub(crate) fn entry(&self, id: PrimitiveId) -> Rc<RefCell<T>> {
        match self.entries.borrow().get(&id) {
            Some(rc) => Rc::clone(rc),
            None => panic!(
                "no data \"{}\" attached to primitive {id} (wrong storage, kind mask, or ghost)",
                self.name
            ),
        }
    }

    pub(crate) fn contains(&self, id: PrimitiveId) -> bool {
        self.entries.borrow().contains_key(&id)
    }
}

/// Object-safe view of a column, used by registration and migration.
pub(crate) trait AnyColumn {
    fn name(&self) -> &str;
    fn kinds(&self) -> KindMask;
    fn persistence(&self) -> Persistence;
    /// Creates and stores the instance for a newly local primitive.
    fn initialize_entry(&self, primitive: &Primitive);
    fn has_entry(&self, id: PrimitiveId) -> bool;
    fn remove_entry(&self, id: PrimitiveId);
    fn serialize_entry(&self, id: PrimitiveId) -> Result<Vec<u8>, GridError>;
    fn deserialize_entry(&self, primitive: &Primitive, bytes: &[u8]) -> Result<(), GridError>;
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: 'static> AnyColumn for Column<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> KindMask {
        self.kinds
    }

    fn persistence(&self) -> Persistence {
        self.handling.persistence()
    }

    fn initialize_entry(&self, primitive: &Primitive) {
        if !self.kinds.contains(primitive.kind()) {
            return;
        }
        let value = self.handling.initialize(primitive);
        self.entries
            .borrow_mut()
            .insert(primitive.id(), Rc::new(RefCell::new(value)));
    }

    fn has_entry(&self, id: PrimitiveId) -> bool {
        self.contains(id)
    }

    fn remove_entry(&self, id: PrimitiveId) {
        self.entries.borrow_mut().remove(&id);
    }

    fn serialize_entry(&self, id: PrimitiveId) -> Result<Vec<u8>, GridError> {
        let entry = self.entry(id);
        let value = entry.borrow();
        self.handling.serialize(&value)
    }

    fn deserialize_entry(&self, primitive: &Primitive, bytes: &[u8]) -> Result<(), GridError> {
        let value = self.handling.deserialize(primitive, bytes)?;
        self.entries
            .borrow_mut()
            .insert(primitive.id(), Rc::new(RefCell::new(value)));
        Ok(())
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}
