// Block / chunk / region coordinates, and finding the archive entry for a chunk

use crate::error::Result;
use crate::node::{NodeId, NodeKind, NodeTree};
use serde::{Deserialize, Serialize};

/// Blocks per chunk side.
pub const CHUNK_SIZE: i32 = 16;
/// Chunks per region side. A region archive has `REGION_SIZE²` slots.
pub const REGION_SIZE: i32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPos { x, y, z }
    }

    pub fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x.div_euclid(CHUNK_SIZE),
            z: self.z.div_euclid(CHUNK_SIZE),
        }
    }

    /// Position within its chunk, each axis in `0..16` (y unchanged).
    pub fn local(&self) -> (i32, i32, i32) {
        (
            self.x.rem_euclid(CHUNK_SIZE),
            self.y,
            self.z.rem_euclid(CHUNK_SIZE),
        )
    }
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        ChunkPos { x, z }
    }

    pub fn region(&self) -> RegionPos {
        RegionPos {
            x: self.x.div_euclid(REGION_SIZE),
            z: self.z.div_euclid(REGION_SIZE),
        }
    }

    /// Position within its region, each axis in `0..32`.
    pub fn local(&self) -> (i32, i32) {
        (self.x.rem_euclid(REGION_SIZE), self.z.rem_euclid(REGION_SIZE))
    }

    /// Entry slot inside the region archive.
    pub fn slot(&self) -> usize {
        let (lx, lz) = self.local();
        (lx + lz * REGION_SIZE) as usize
    }
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        RegionPos { x, z }
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("r.{}.{}.{}", self.x, self.z, extension)
    }

    /// Parse `r.<x>.<z>.<ext>`.
    pub fn parse_file_name(name: &str) -> Option<RegionPos> {
        let mut parts = name.split('.');
        if parts.next()? != "r" {
            return None;
        }
        let x = parts.next()?.parse().ok()?;
        let z = parts.next()?.parse().ok()?;
        parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Some(RegionPos { x, z })
    }

    /// The chunk stored at `slot` of this region's archive. `None` when the
    /// chunk coordinates fall outside `i32`.
    pub fn chunk_at_slot(&self, slot: usize) -> Option<ChunkPos> {
        let slot = i32::try_from(slot).ok()?;
        let x = self
            .x
            .checked_mul(REGION_SIZE)?
            .checked_add(slot % REGION_SIZE)?;
        let z = self
            .z
            .checked_mul(REGION_SIZE)?
            .checked_add(slot / REGION_SIZE)?;
        Some(ChunkPos { x, z })
    }
}

impl NodeTree {
    /// Find the archive entry holding `chunk` anywhere under `search_root`,
    /// listing directories and region archives as needed.
    pub fn find_chunk(&mut self, search_root: NodeId, chunk: ChunkPos) -> Result<Option<NodeId>> {
        let region = chunk.region();
        let mut pending = vec![search_root];

        while let Some(node) = pending.pop() {
            match self.kind(node) {
                Some(NodeKind::Root) | Some(NodeKind::Directory { .. }) => {
                    if let Err(e) = self.materialize(node) {
                        log::warn!("Skipping {} while locating chunk: {e}", self.path(node));
                        continue;
                    }
                    // Reverse so the walk pops children in listing order
                    pending.extend(self.children(node).iter().rev().copied());
                }
                Some(NodeKind::Archive { .. }) => {
                    if RegionPos::parse_file_name(&self.path_name(node)) != Some(region) {
                        continue;
                    }
                    if let Err(e) = self.materialize(node) {
                        log::warn!("Skipping {} while locating chunk: {e}", self.path(node));
                        continue;
                    }
                    let found = self.children(node).iter().copied().find(|&entry| {
                        matches!(self.kind(entry), Some(NodeKind::ArchiveEntry { slot }) if *slot == chunk.slot())
                    });
                    if found.is_some() {
                        log::debug!("Chunk [{}, {}] is {}", chunk.x, chunk.z, self.path(node));
                        return Ok(found);
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    pub fn find_block(&mut self, search_root: NodeId, block: BlockPos) -> Result<Option<NodeId>> {
        self.find_chunk(search_root, block.chunk())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::*;
    use crate::storage::{FsStorage, Storage};
    use crate::value::{Compound, NodeValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_block_to_chunk_floors_negatives() {
        assert_eq!(BlockPos::new(0, 64, 15).chunk(), ChunkPos::new(0, 0));
        assert_eq!(BlockPos::new(16, 64, -1).chunk(), ChunkPos::new(1, -1));
        assert_eq!(BlockPos::new(-17, 0, -16).chunk(), ChunkPos::new(-2, -1));
        assert_eq!(BlockPos::new(-17, 5, -16).local(), (15, 5, 0));
    }

    #[test]
    fn test_chunk_to_region_and_slot() {
        let chunk = ChunkPos::new(33, -1);
        assert_eq!(chunk.region(), RegionPos::new(1, -1));
        assert_eq!(chunk.local(), (1, 31));
        assert_eq!(chunk.slot(), 1 + 31 * 32);
        assert_eq!(chunk.region().chunk_at_slot(chunk.slot()), Some(chunk));
    }

    #[test]
    fn test_chunk_at_slot_out_of_range() {
        assert_eq!(RegionPos::new(100_000_000, 0).chunk_at_slot(0), None);
        assert_eq!(RegionPos::new(0, i32::MIN).chunk_at_slot(0), None);
        assert_eq!(RegionPos::new(0, 0).chunk_at_slot(usize::MAX), None);
        assert_eq!(
            RegionPos::new(-1, 2).chunk_at_slot(33),
            Some(ChunkPos::new(-31, 65))
        );
    }

    #[test]
    fn test_unreadable_directory_is_skipped() {
        let (tmp, mut tree, world) = setup_world();
        let gone = tmp.path().join("world").join("backup");
        std::fs::create_dir(&gone).unwrap();
        tree.expand(world).unwrap();
        std::fs::remove_dir(&gone).unwrap();

        let entry = tree.find_chunk(world, ChunkPos::new(1, 1)).unwrap();
        assert_eq!(entry.map(|e| tree.path(e)), Some("world/region/r.0.0.jsonl/33".to_string()));
        let backup = child_named(&tree, world, "backup");
        assert!(!tree.is_materialized(backup));
    }

    #[test]
    fn test_far_region_entries_fall_back_to_slot_label() {
        let (tmp, mut tree, world) = setup_world();
        let far = tmp.path().join("world").join("region").join("r.100000000.0.jsonl");
        FsStorage::new()
            .write_entry(&far, 5, &Compound::new().with("xPos", NodeValue::Int(0)))
            .unwrap();

        tree.expand(world).unwrap();
        let region = child_named(&tree, world, "region");
        tree.expand(region).unwrap();
        let archive = child_named(&tree, region, "r.100000000.0.jsonl");
        tree.expand(archive).unwrap();
        let entry = child_named(&tree, archive, "5");
        assert_eq!(tree.display(entry), "Entry 5");
    }

    #[test]
    fn test_region_file_names() {
        let region = RegionPos::new(-3, 12);
        assert_eq!(region.file_name("jsonl"), "r.-3.12.jsonl");
        assert_eq!(RegionPos::parse_file_name("r.-3.12.jsonl"), Some(region));
        assert_eq!(RegionPos::parse_file_name("r.1.2"), None);
        assert_eq!(RegionPos::parse_file_name("x.1.2.jsonl"), None);
        assert_eq!(RegionPos::parse_file_name("r.a.2.jsonl"), None);
        assert_eq!(RegionPos::parse_file_name("r.1.2.jsonl.bak"), None);
    }

    #[test]
    fn test_find_block_in_world() {
        let (_tmp, mut tree, world) = setup_world();

        let entry = tree
            .find_block(world, BlockPos::new(20, 70, 30))
            .unwrap()
            .unwrap();
        assert_eq!(tree.path(entry), "world/region/r.0.0.jsonl/33");
        assert_eq!(tree.display(entry), "Chunk [1, 1]");

        // Vacant slot and missing region
        assert!(tree.find_chunk(world, ChunkPos::new(2, 0)).unwrap().is_none());
        assert!(tree.find_chunk(world, ChunkPos::new(40, 0)).unwrap().is_none());
    }
}
