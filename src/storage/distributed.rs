//! Per-rank storage: owned primitives, ghost copies, and the data registry.

use crate::communication::communicator::{Communicator, NoComm};
use crate::data::columns::{AnyColumn, Column};
use crate::data::handle::{DataHandle, PrimitiveDataHandling};
use crate::debug_invariants::DebugInvariants;
use crate::grid_error::GridError;
use crate::primitives::{KindMask, Primitive, PrimitiveId, PrimitiveKind};
use crate::storage::SetupStorage;
use hashbrown::HashMap;
use log::debug;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// One rank's view of the distributed mesh.
///
/// Owned primitives carry data columns and are iterated in ascending ID
/// order per kind, which makes every sweep deterministic. Ghosts are
/// read-only topology/geometry copies of direct neighbors owned elsewhere;
/// they never carry data.
pub struct DistributedStorage<C: Communicator = NoComm> {
    comm: C,
    primitives: BTreeMap<PrimitiveId, Primitive>,
    ghosts: BTreeMap<PrimitiveId, Primitive>,
    rank_of: HashMap<PrimitiveId, usize>,
    kind_ids: [Vec<PrimitiveId>; 4],
    has_cells: bool,
    columns: RefCell<Vec<Rc<dyn AnyColumn>>>,
}

impl<C: Communicator> DistributedStorage<C> {
    /// Takes this rank's share of a replicated setup storage.
    pub fn from_setup(setup: &SetupStorage, comm: C) -> Rc<DistributedStorage<C>> {
        let rank = comm.rank();
        let mut primitives = BTreeMap::new();
        let mut rank_of = HashMap::new();
        for p in setup.primitives() {
            rank_of.insert(p.id(), setup.target_rank(p.id()));
            if setup.target_rank(p.id()) == rank {
                primitives.insert(p.id(), p.clone());
            }
        }
        let mut ghosts = BTreeMap::new();
        for p in primitives.values() {
            for kind in PrimitiveKind::ALL {
                for &nid in p.neighbor_ids(kind) {
                    if rank_of[&nid] != rank && !ghosts.contains_key(&nid) {
                        let n = setup
                            .primitive(nid)
                            .unwrap_or_else(|| panic!("setup storage lost primitive {nid}"));
                        ghosts.insert(nid, n.clone());
                    }
                }
            }
        }
        debug!(
            "rank {rank}: {} owned primitives, {} ghosts",
            primitives.len(),
            ghosts.len()
        );
        let kind_ids = index_kinds(&primitives);
        let storage = DistributedStorage {
            comm,
            primitives,
            ghosts,
            rank_of,
            kind_ids,
            has_cells: setup.has_global_cells(),
            columns: RefCell::new(Vec::new()),
        };
        crate::hg_debug_assert_ok!(storage.validate_invariants(), "distributed storage");
        Rc::new(storage)
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_ranks(&self) -> usize {
        self.comm.size()
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn has_global_cells(&self) -> bool {
        self.has_cells
    }

    /// The element-bearing primitive kind of this mesh.
    pub fn top_kind(&self) -> PrimitiveKind {
        if self.has_cells {
            PrimitiveKind::Cell
        } else {
            PrimitiveKind::Face
        }
    }

    /// An owned or ghosted primitive.
    ///
    /// # Errors
    /// `GridError::PrimitiveNotFound` if `id` is not visible on this rank.
    pub fn primitive(&self, id: PrimitiveId) -> Result<&Primitive, GridError> {
        self.primitives
            .get(&id)
            .or_else(|| self.ghosts.get(&id))
            .ok_or(GridError::PrimitiveNotFound(id))
    }

    pub fn is_owned(&self, id: PrimitiveId) -> bool {
        self.primitives.contains_key(&id)
    }

    /// Owning rank of any primitive in the global mesh.
    pub fn rank_of(&self, id: PrimitiveId) -> Option<usize> {
        self.rank_of.get(&id).copied()
    }

    /// Owned primitive IDs of `kind`, ascending.
    pub fn owned_ids(&self, kind: PrimitiveKind) -> &[PrimitiveId] {
        &self.kind_ids[kind.dimension()]
    }

    /// Owned primitives of `kind`, ascending by ID.
    pub fn owned(&self, kind: PrimitiveKind) -> impl Iterator<Item = &Primitive> {
        self.owned_ids(kind).iter().map(move |id| &self.primitives[id])
    }

    pub fn num_owned(&self) -> usize {
        self.primitives.len()
    }

    /// Ranks this rank shares a primitive border with, ascending.
    pub fn neighbor_ranks(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self
            .ghosts
            .keys()
            .filter_map(|id| self.rank_of(*id))
            .collect();
        set.into_iter().collect()
    }

    /// Registers a data column and eagerly initializes one instance per
    /// owned primitive matching `kinds`.
    pub fn add_data<T: 'static>(
        &self,
        name: impl Into<String>,
        kinds: KindMask,
        handling: Box<dyn PrimitiveDataHandling<T>>,
    ) -> DataHandle<T> {
        let column = Rc::new(Column::new(name, kinds, handling));
        for p in self.primitives.values() {
            column.initialize_entry(p);
        }
        let mut columns = self.columns.borrow_mut();
        let handle = DataHandle::new(columns.len());
        columns.push(column);
        handle
    }

    /// The data instance attached to owned primitive `id`.
    ///
    /// # Panics
    /// Panics on an unregistered handle, a type mismatch, or a primitive
    /// without an instance (ghost, wrong kind, wrong storage).
    pub fn data<T: 'static>(&self, handle: DataHandle<T>, id: PrimitiveId) -> Rc<RefCell<T>> {
        self.column(handle).entry(id)
    }

    pub(crate) fn column<T: 'static>(&self, handle: DataHandle<T>) -> Rc<Column<T>> {
        let columns = self.columns.borrow();
        let erased = columns
            .get(handle.index)
            .unwrap_or_else(|| panic!("data handle {} was never registered here", handle.index))
            .clone();
        drop(columns);
        match erased.as_any_rc().downcast::<Column<T>>() {
            Ok(column) => column,
            Err(_) => panic!(
                "data handle {} does not hold type {}",
                handle.index,
                std::any::type_name::<T>()
            ),
        }
    }

    pub(crate) fn erased_columns(&self) -> Vec<Rc<dyn AnyColumn>> {
        self.columns.borrow().clone()
    }

    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut BTreeMap<PrimitiveId, Primitive>,
        &mut BTreeMap<PrimitiveId, Primitive>,
        &mut HashMap<PrimitiveId, usize>,
        &C,
    ) {
        (
            &mut self.primitives,
            &mut self.ghosts,
            &mut self.rank_of,
            &self.comm,
        )
    }

    pub(crate) fn reindex_kinds(&mut self) {
        self.kind_ids = index_kinds(&self.primitives);
    }
}

fn index_kinds(primitives: &BTreeMap<PrimitiveId, Primitive>) -> [Vec<PrimitiveId>; 4] {
    let mut kind_ids: [Vec<PrimitiveId>; 4] = Default::default();
    for p in primitives.values() {
        kind_ids[p.kind().dimension()].push(p.id());
    }
    kind_ids
}

impl<C: Communicator> DebugInvariants for DistributedStorage<C> {
    fn validate_invariants(&self) -> Result<(), GridError> {
        let rank = self.rank();
        for p in self.primitives.values() {
            for kind in PrimitiveKind::ALL {
                for &nid in p.neighbor_ids(kind) {
                    let n = self.primitive(nid).map_err(|_| {
                        GridError::Topology(format!(
                            "neighbor {nid} of owned {} is neither owned nor ghosted",
                            p.id()
                        ))
                    })?;
                    if !n.neighbor_ids(p.kind()).contains(&p.id()) {
                        return Err(GridError::Topology(format!(
                            "neighbor link {} -> {nid} is not mirrored",
                            p.id()
                        )));
                    }
                }
            }
            if self.rank_of(p.id()) != Some(rank) {
                return Err(GridError::Topology(format!(
                    "owned primitive {} is mapped to rank {:?}",
                    p.id(),
                    self.rank_of(p.id())
                )));
            }
        }
        for id in self.ghosts.keys() {
            match self.rank_of(*id) {
                None => {
                    return Err(GridError::Topology(format!(
                        "ghost {id} is missing from the rank map"
                    )))
                }
                Some(r) if r == rank => {
                    return Err(GridError::Topology(format!(
                        "ghost {id} is mapped to the local rank"
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::handle::Persistence;

    struct KindTag;
    impl PrimitiveDataHandling<u8> for KindTag {
        fn initialize(&self, primitive: &Primitive) -> u8 {
            primitive.kind().dimension() as u8
        }
        fn persistence(&self) -> Persistence {
            Persistence::Volatile
        }
    }

    fn square() -> SetupStorage {
        SetupStorage::from_triangles(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [1.0, 1.0, 0.0],
            ],
            &[[0, 1, 2], [1, 3, 2]],
        )
        .unwrap()
    }

    #[test]
    fn serial_storage_owns_everything() {
        let setup = square();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        assert_eq!(storage.num_owned(), setup.num_primitives());
        assert_eq!(storage.owned_ids(PrimitiveKind::Face).len(), 2);
        assert_eq!(storage.owned_ids(PrimitiveKind::Edge).len(), 5);
        assert!(storage.neighbor_ranks().is_empty());
        storage.validate_invariants().unwrap();
    }

    #[test]
    fn data_registration_and_access() {
        let setup = square();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let handle = storage.add_data("kind-tag", KindMask::VERTEX | KindMask::EDGE, Box::new(KindTag));
        let vid = storage.owned_ids(PrimitiveKind::Vertex)[0];
        assert_eq!(*storage.data(handle, vid).borrow(), 0);
        let eid = storage.owned_ids(PrimitiveKind::Edge)[0];
        *storage.data(handle, eid).borrow_mut() = 9;
        assert_eq!(*storage.data(handle, eid).borrow(), 9);
    }

    #[test]
    #[should_panic(expected = "no data")]
    fn unmatched_kind_has_no_instance() {
        let setup = square();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        let handle = storage.add_data("kind-tag", KindMask::VERTEX, Box::new(KindTag));
        let fid = storage.owned_ids(PrimitiveKind::Face)[0];
        storage.data(handle, fid);
    }

    #[test]
    fn owned_iteration_is_sorted() {
        let setup = square();
        let storage = DistributedStorage::from_setup(&setup, NoComm);
        for kind in PrimitiveKind::ALL {
            let ids = storage.owned_ids(kind);
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
