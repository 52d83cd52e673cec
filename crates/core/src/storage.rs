//! Tile store: physical copies, coherence and reference counts
//!
//! Each tile coordinate maps to a [`TileNode`] holding at most one copy per
//! memory location. Copies follow a small Modified/Shared/Invalid protocol:
//! a write acquisition invalidates every other copy, and a read acquisition at
//! a location without a valid copy stages one from any valid copy.
//!
//! Two counters guard reclamation:
//! - `holds`: outstanding read acquisitions, decremented by [`TileStore::tick`];
//!   each copy also counts the readers acquired at its location
//! - `life`: remaining consumers of a remote workspace tile, set by whoever
//!   delivered the tile to this rank
//!
//! Device copies are only reclaimed by an explicit [`TileStore::release`],
//! and only once nobody reads them; their buffers go back to a per-device pool.

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::scalar::Scalar;
use crate::tile::{Tile, TileData};
use crate::types::{Layout, Location};

/// Physical tile coordinate
pub type TileKey = (usize, usize);

/// Coherence state of one copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    /// Newest copy; every other copy is invalid or was staged from it
    Modified,
    /// Valid copy
    Shared,
    /// Stale; must be refreshed before use
    Invalid,
}

/// Kind of acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

struct Instance<T: Scalar> {
    tile: Tile<T>,
    state: CopyState,
    readers: usize,
}

struct TileNode<T: Scalar> {
    mb: usize,
    nb: usize,
    instances: HashMap<Location, Instance<T>>,
    /// Location of the authoritative copy; `None` for remote workspace tiles
    origin: Option<Location>,
    life: usize,
    holds: usize,
}

impl<T: Scalar> TileNode<T> {
    fn local(mb: usize, nb: usize, origin: Location, data: TileData<T>) -> Self {
        let mut instances = HashMap::new();
        instances.insert(
            origin,
            Instance {
                tile: Tile::new(mb, nb, data, origin),
                state: CopyState::Modified,
                readers: 0,
            },
        );
        Self {
            mb,
            nb,
            instances,
            origin: Some(origin),
            life: 0,
            holds: 0,
        }
    }

    fn valid_source(&self) -> Option<&Tile<T>> {
        self.instances
            .values()
            .filter(|inst| inst.state != CopyState::Invalid)
            .min_by_key(|inst| match inst.state {
                CopyState::Modified => 0,
                _ => 1,
            })
            .map(|inst| &inst.tile)
    }

    fn only_valid_copy(&self, location: Location) -> bool {
        self.instances
            .iter()
            .all(|(loc, inst)| *loc == location || inst.state == CopyState::Invalid)
    }

    fn reclaimable(&self) -> bool {
        self.origin.is_none() && self.life == 0 && self.holds == 0
    }
}

/// Host first, then devices by index
fn location_order(location: Location) -> usize {
    match location {
        Location::Host => 0,
        Location::Device(d) => d + 1,
    }
}

/// Reusable device allocations
struct BufferPool<T> {
    free: Vec<Vec<T>>,
    limit: usize,
}

impl<T> BufferPool<T> {
    fn new(limit: usize) -> Self {
        Self {
            free: Vec::new(),
            limit,
        }
    }

    fn take(&mut self, len: usize) -> Vec<T> {
        match self.free.iter().position(|buf| buf.capacity() >= len) {
            Some(idx) => self.free.swap_remove(idx),
            None => Vec::with_capacity(len),
        }
    }

    fn give(&mut self, buf: Vec<T>) {
        if self.free.len() < self.limit {
            self.free.push(buf);
        }
    }
}

/// Concurrent map of tile coordinates to their copies
pub struct TileStore<T: Scalar> {
    nodes: DashMap<TileKey, TileNode<T>>,
    num_devices: usize,
    pools: Vec<Mutex<BufferPool<T>>>,
}

const POOL_LIMIT: usize = 256;

impl<T: Scalar> TileStore<T> {
    pub fn new(num_devices: usize) -> Self {
        Self {
            nodes: DashMap::new(),
            num_devices,
            pools: (0..num_devices)
                .map(|_| Mutex::new(BufferPool::new(POOL_LIMIT)))
                .collect(),
        }
    }

    pub fn num_devices(&self) -> usize {
        self.num_devices
    }

    fn check_location(&self, location: Location, layout: Layout) -> Result<()> {
        if let Location::Device(d) = location {
            if d >= self.num_devices {
                return Err(EngineError::Resource(format!(
                    "device {} out of range ({} devices)",
                    d, self.num_devices
                )));
            }
            if layout != Layout::ColMajor {
                return Err(EngineError::Layout {
                    location,
                    from: Layout::ColMajor,
                    to: layout,
                });
            }
        }
        Ok(())
    }

    fn stage(&self, src: &TileData<T>, mb: usize, nb: usize, location: Location) -> TileData<T> {
        match location {
            Location::Host => src.to_layout(mb, nb, src.layout()),
            Location::Device(d) => {
                let buf = self.pools[d].lock().take(mb * nb);
                let mut data = TileData::recycle(buf, mb, nb, Layout::ColMajor);
                data.copy_from(src, mb, nb);
                data
            }
        }
    }

    fn recycle(&self, location: Location, tile: Tile<T>) {
        if let Location::Device(d) = location {
            if let Some(buf) = tile.try_into_vec() {
                self.pools[d].lock().give(buf);
            }
        }
    }

    /// Insert an authoritative tile at `origin`, replacing any previous copies
    pub fn insert(&self, key: TileKey, mb: usize, nb: usize, data: TileData<T>, origin: Location) -> Result<Tile<T>> {
        self.check_location(origin, data.layout())?;
        let node = TileNode::local(mb, nb, origin, data);
        let tile = node.instances[&origin].tile.clone();
        self.nodes.insert(key, node);
        Ok(tile)
    }

    /// Insert a remote tile received from its owner, consumed `life` times
    pub fn insert_workspace(&self, key: TileKey, mb: usize, nb: usize, data: TileData<T>, life: usize) {
        let mut node = TileNode::local(mb, nb, Location::Host, data);
        node.origin = None;
        if let Some(inst) = node.instances.get_mut(&Location::Host) {
            inst.state = CopyState::Shared;
        }
        node.life = life;
        self.nodes.insert(key, node);
    }

    /// Acquire a copy of `key` at `location` in `layout`.
    ///
    /// `create` carries the tile extent when the caller owns the tile and it
    /// may be created zero-filled on the host.
    pub fn acquire(
        &self,
        key: TileKey,
        location: Location,
        layout: Layout,
        access: Access,
        create: Option<(usize, usize)>,
    ) -> Result<Tile<T>> {
        self.check_location(location, layout)?;

        let mut node = match create {
            Some((mb, nb)) => self.nodes.entry(key).or_insert_with(|| {
                TileNode::local(mb, nb, Location::Host, TileData::zeros(mb, nb, Layout::ColMajor))
            }),
            None => self.nodes.get_mut(&key).ok_or_else(|| {
                EngineError::Resource(format!("tile {:?} is not resident on this rank", key))
            })?,
        };

        let current = node
            .instances
            .get(&location)
            .filter(|inst| inst.state != CopyState::Invalid)
            .map(|inst| inst.tile.clone());

        let tile = match current {
            Some(tile) => tile,
            None => {
                let (mb, nb) = (node.mb, node.nb);
                let staged = {
                    let src = node.valid_source().ok_or_else(|| {
                        EngineError::Resource(format!("tile {:?} has no valid copy", key))
                    })?;
                    let guard = src.read();
                    self.stage(&guard, mb, nb, location)
                };
                tracing::trace!(?key, %location, "staged tile copy");
                let tile = Tile::new(mb, nb, staged, location);
                let previous = node.instances.insert(
                    location,
                    Instance {
                        tile: tile.clone(),
                        state: CopyState::Shared,
                        readers: 0,
                    },
                );
                if let Some(old) = previous {
                    self.recycle(location, old.tile);
                }
                tile
            }
        };

        if tile.layout() != layout {
            tile.convert_layout(layout);
        }

        match access {
            Access::Read => {
                node.holds += 1;
                if let Some(inst) = node.instances.get_mut(&location) {
                    inst.readers += 1;
                }
            }
            Access::Write => {
                if node.holds > 0 {
                    return Err(EngineError::Resource(format!(
                        "tile {:?} has {} outstanding readers",
                        key, node.holds
                    )));
                }
                for (loc, inst) in node.instances.iter_mut() {
                    inst.state = if *loc == location {
                        CopyState::Modified
                    } else {
                        CopyState::Invalid
                    };
                }
            }
        }
        Ok(tile)
    }

    /// Record one finished consumption of a read acquisition
    pub fn tick(&self, key: TileKey) -> Result<()> {
        self.tick_at(key, None)
    }

    /// Like [`tick`](Self::tick), returning the reader of the copy at
    /// `location`. Without a location the first copy with readers is used,
    /// host before devices.
    pub fn tick_at(&self, key: TileKey, location: Option<Location>) -> Result<()> {
        let reclaim = {
            let mut node = self.nodes.get_mut(&key).ok_or_else(|| {
                EngineError::Resource(format!("tick on absent tile {:?}", key))
            })?;
            if node.holds == 0 {
                return Err(EngineError::InvalidArgument(format!(
                    "tick on tile {:?} without an outstanding acquisition",
                    key
                )));
            }
            node.holds -= 1;
            let reader = match location {
                Some(loc) => node.instances.get_mut(&loc).filter(|inst| inst.readers > 0),
                None => node
                    .instances
                    .iter_mut()
                    .filter(|(_, inst)| inst.readers > 0)
                    .min_by_key(|(loc, _)| location_order(**loc))
                    .map(|(_, inst)| inst),
            };
            if let Some(inst) = reader {
                inst.readers -= 1;
            }
            if node.origin.is_none() {
                node.life = node.life.saturating_sub(1);
            }
            if node.reclaimable() {
                node.instances.remove(&Location::Host);
                node.instances.is_empty()
            } else {
                false
            }
        };
        if reclaim {
            self.nodes
                .remove_if(&key, |_, node| node.reclaimable() && node.instances.is_empty());
        }
        Ok(())
    }

    /// Drop the workspace copy of `key` on `device`, returning its buffer to
    /// the device pool. Authoritative copies, the only valid copy and copies
    /// with outstanding readers are kept.
    pub fn release(&self, key: TileKey, device: usize) -> Result<()> {
        let location = Location::Device(device);
        self.check_location(location, Layout::ColMajor)?;
        let reclaim = {
            let mut node = match self.nodes.get_mut(&key) {
                Some(node) => node,
                None => return Ok(()),
            };
            if node.origin == Some(location) || !node.instances.contains_key(&location) {
                return Ok(());
            }
            let readers = node.instances[&location].readers;
            if readers > 0 {
                tracing::trace!(?key, device, readers, "kept device copy: still read");
                return Ok(());
            }
            let stale = node.instances[&location].state == CopyState::Invalid;
            if !stale && !node.reclaimable() && node.only_valid_copy(location) {
                tracing::trace!(?key, device, "kept device copy: only valid version");
                return Ok(());
            }
            if let Some(inst) = node.instances.remove(&location) {
                self.recycle(location, inst.tile);
            }
            node.reclaimable() && node.instances.is_empty()
        };
        if reclaim {
            self.nodes
                .remove_if(&key, |_, node| node.reclaimable() && node.instances.is_empty());
        }
        Ok(())
    }

    /// Destroy every copy of `key`
    pub fn erase(&self, key: TileKey) {
        if let Some((_, node)) = self.nodes.remove(&key) {
            for (loc, inst) in node.instances {
                self.recycle(loc, inst.tile);
            }
        }
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn life(&self, key: TileKey) -> Option<usize> {
        self.nodes.get(&key).map(|node| node.life)
    }

    pub fn set_life(&self, key: TileKey, life: usize) -> Result<()> {
        let mut node = self
            .nodes
            .get_mut(&key)
            .ok_or_else(|| EngineError::Resource(format!("tile {:?} absent", key)))?;
        node.life = life;
        Ok(())
    }

    /// Outstanding read acquisitions; 0 for absent tiles
    pub fn holds(&self, key: TileKey) -> usize {
        self.nodes.get(&key).map(|node| node.holds).unwrap_or(0)
    }

    /// Copies of `key` and their states
    pub fn copies(&self, key: TileKey) -> Vec<(Location, CopyState)> {
        let mut out: Vec<_> = self
            .nodes
            .get(&key)
            .map(|node| node.instances.iter().map(|(l, i)| (*l, i.state)).collect())
            .unwrap_or_default();
        out.sort_by_key(|(loc, _)| location_order(*loc));
        out
    }

    /// Coordinates with any copy present, in no particular order
    pub fn keys(&self) -> Vec<TileKey> {
        self.nodes.iter().map(|entry| *entry.key()).collect()
    }

    /// Buffers cached in the pool of `device`
    pub fn pooled_buffers(&self, device: usize) -> usize {
        self.pools.get(device).map(|p| p.lock().free.len()).unwrap_or(0)
    }
}

impl<T: Scalar> std::fmt::Debug for TileStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("tiles", &self.nodes.len())
            .field("num_devices", &self.num_devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(mb: usize, nb: usize, value: f64) -> TileData<f64> {
        TileData::from_vec(mb, nb, vec![value; mb * nb], mb, Layout::ColMajor).unwrap()
    }

    #[test]
    fn test_lazy_creation_only_with_extent() {
        let store = TileStore::<f64>::new(0);
        assert!(matches!(
            store.acquire((0, 0), Location::Host, Layout::ColMajor, Access::Read, None),
            Err(EngineError::Resource(_))
        ));
        let tile = store
            .acquire((0, 0), Location::Host, Layout::ColMajor, Access::Read, Some((2, 3)))
            .unwrap();
        assert_eq!(tile.physical_extent(), (2, 3));
        assert_eq!(store.holds((0, 0)), 1);
        store.tick((0, 0)).unwrap();
        assert_eq!(store.holds((0, 0)), 0);
    }

    #[test]
    fn test_tick_never_below_zero() {
        let store = TileStore::<f64>::new(0);
        store.insert((1, 1), 2, 2, filled(2, 2, 1.0), Location::Host).unwrap();
        assert!(store.tick((1, 1)).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_invalid_device_and_layout() {
        let store = TileStore::<f64>::new(1);
        store.insert((0, 0), 2, 2, filled(2, 2, 1.0), Location::Host).unwrap();
        assert!(matches!(
            store.acquire((0, 0), Location::Device(2), Layout::ColMajor, Access::Read, None),
            Err(EngineError::Resource(_))
        ));
        assert!(matches!(
            store.acquire((0, 0), Location::Device(0), Layout::RowMajor, Access::Read, None),
            Err(EngineError::Layout { .. })
        ));
        assert_eq!(store.holds((0, 0)), 0);
    }

    #[test]
    fn test_write_on_device_invalidates_host() {
        let store = TileStore::<f64>::new(2);
        store.insert((0, 0), 2, 2, filled(2, 2, 1.0), Location::Host).unwrap();
        let dev = store
            .acquire((0, 0), Location::Device(1), Layout::ColMajor, Access::Write, None)
            .unwrap();
        dev.write().set(0, 0, 5.0);
        drop(dev);
        assert_eq!(
            store.copies((0, 0)),
            vec![
                (Location::Host, CopyState::Invalid),
                (Location::Device(1), CopyState::Modified)
            ]
        );
        // only valid copy survives release
        store.release((0, 0), 1).unwrap();
        assert_eq!(store.copies((0, 0)).len(), 2);

        let host = store
            .acquire((0, 0), Location::Host, Layout::ColMajor, Access::Read, None)
            .unwrap();
        assert_eq!(host.at(0, 0), 5.0);
        store.tick((0, 0)).unwrap();

        store.release((0, 0), 1).unwrap();
        assert_eq!(store.copies((0, 0)), vec![(Location::Host, CopyState::Shared)]);
        assert_eq!(store.pooled_buffers(1), 1);
    }

    #[test]
    fn test_write_refused_while_readers_outstanding() {
        let store = TileStore::<f64>::new(0);
        store.insert((0, 0), 2, 2, filled(2, 2, 1.0), Location::Host).unwrap();
        store
            .acquire((0, 0), Location::Host, Layout::ColMajor, Access::Read, None)
            .unwrap();
        assert!(matches!(
            store.acquire((0, 0), Location::Host, Layout::ColMajor, Access::Write, None),
            Err(EngineError::Resource(_))
        ));
        store.tick((0, 0)).unwrap();
        assert!(store
            .acquire((0, 0), Location::Host, Layout::ColMajor, Access::Write, None)
            .is_ok());
    }

    #[test]
    fn test_workspace_tile_reclaimed_when_life_ends() {
        let store = TileStore::<f64>::new(1);
        store.insert_workspace((3, 0), 2, 2, filled(2, 2, 2.0), 2);
        for _ in 0..2 {
            store
                .acquire((3, 0), Location::Device(0), Layout::ColMajor, Access::Read, None)
                .unwrap();
        }
        store.tick((3, 0)).unwrap();
        assert_eq!(store.life((3, 0)), Some(1));
        // the second reader still uses the device copy
        store.release((3, 0), 0).unwrap();
        assert_eq!(store.copies((3, 0)).len(), 2);

        store.tick((3, 0)).unwrap();
        assert_eq!(store.copies((3, 0)), vec![(Location::Device(0), CopyState::Shared)]);
        store.release((3, 0), 0).unwrap();
        assert!(!store.contains((3, 0)));
    }

    #[test]
    fn test_release_waits_for_readers_at_that_location() {
        let store = TileStore::<f64>::new(2);
        store.insert((0, 0), 2, 2, filled(2, 2, 1.0), Location::Host).unwrap();
        for device in 0..2 {
            store
                .acquire((0, 0), Location::Device(device), Layout::ColMajor, Access::Read, None)
                .unwrap();
        }

        // device 0 is done; device 1 still reads its own copy
        store.tick_at((0, 0), Some(Location::Device(0))).unwrap();
        store.release((0, 0), 0).unwrap();
        store.release((0, 0), 1).unwrap();
        assert_eq!(
            store.copies((0, 0)),
            vec![
                (Location::Host, CopyState::Modified),
                (Location::Device(1), CopyState::Shared)
            ]
        );

        store.tick_at((0, 0), Some(Location::Device(1))).unwrap();
        store.release((0, 0), 1).unwrap();
        assert_eq!(store.copies((0, 0)), vec![(Location::Host, CopyState::Modified)]);
        assert_eq!(store.holds((0, 0)), 0);
    }

    #[test]
    fn test_read_layout_last_wins() {
        let store = TileStore::<f64>::new(0);
        store.insert((0, 0), 2, 3, filled(2, 3, 1.0), Location::Host).unwrap();
        let a = store
            .acquire((0, 0), Location::Host, Layout::RowMajor, Access::Read, None)
            .unwrap();
        assert_eq!(a.layout(), Layout::RowMajor);
        let b = store
            .acquire((0, 0), Location::Host, Layout::ColMajor, Access::Read, None)
            .unwrap();
        assert!(a.same_buffer(&b));
        assert_eq!(a.layout(), Layout::ColMajor);
        assert_eq!(store.holds((0, 0)), 2);
    }
}
