//! Point-in-time copies of world data.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::{BlockState, BlockView};
use crate::schema::{BlockPos, CaptureBounds, ChunkPos, SECTION_VOLUME, SectionPos};

/// An immutable copy of the loaded sections around a capture region.
///
/// Taken on the thread that owns the live world so that encoding can run
/// elsewhere while the world keeps changing. One ring of chunks around the
/// bounds is included so face culling at the border sees real neighbors.
pub struct WorldSnapshot {
    sections: HashMap<SectionPos, Vec<BlockState>>,
    loaded: HashSet<ChunkPos>,
    range: Range<i32>,
}

impl WorldSnapshot {
    pub fn capture(world: &dyn BlockView, bounds: &CaptureBounds) -> Self {
        let range = world.section_range();
        let mut sections = HashMap::new();
        let mut loaded = HashSet::new();

        for x in bounds.min_chunk.x - 1..bounds.max_chunk.x + 1 {
            for z in bounds.min_chunk.z - 1..bounds.max_chunk.z + 1 {
                let chunk = ChunkPos::new(x, z);
                if !world.is_chunk_loaded(chunk) {
                    continue;
                }
                loaded.insert(chunk);
                for y in range.clone() {
                    let section = SectionPos::new(x, y, z);
                    let states: Vec<BlockState> = (0..SECTION_VOLUME)
                        .map(|i| world.block_state(section.block_at(i)))
                        .collect();
                    if states.iter().any(|s| !s.is_air()) {
                        sections.insert(section, states);
                    }
                }
            }
        }

        log::debug!(
            "Snapshot holds {} non-empty sections across {} chunks",
            sections.len(),
            loaded.len()
        );

        Self {
            sections,
            loaded,
            range,
        }
    }
}

impl BlockView for WorldSnapshot {
    fn block_state(&self, pos: BlockPos) -> BlockState {
        self.sections
            .get(&pos.section())
            .map(|states| states[pos.section_index()].clone())
            .unwrap_or_else(BlockState::air)
    }

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool {
        self.loaded.contains(&chunk)
    }

    fn section_range(&self) -> Range<i32> {
        self.range.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::MemoryWorld;

    #[test]
    fn test_snapshot_is_frozen() {
        let world = MemoryWorld::new(0..2);
        let pos = BlockPos::new(4, 20, 4);
        world.set_block(pos, BlockState::new("minecraft:stone", 1));

        let bounds = CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..2);
        let snapshot = WorldSnapshot::capture(&world, &bounds);

        world.set_block(pos, BlockState::new("minecraft:dirt", 2));
        assert_eq!(&*snapshot.block_state(pos).block, "minecraft:stone");
        assert_eq!(&*world.block_state(pos).block, "minecraft:dirt");
        assert!(snapshot.is_chunk_loaded(ChunkPos::new(0, 0)));
        assert!(!snapshot.is_chunk_loaded(ChunkPos::new(5, 5)));
        assert!(snapshot.block_state(BlockPos::new(4, 0, 4)).is_air());
    }

    #[test]
    fn test_snapshot_includes_border_ring() {
        let world = MemoryWorld::new(0..1);
        let outside = BlockPos::new(-1, 0, 0);
        world.set_block(outside, BlockState::new("minecraft:stone", 1));

        let bounds = CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..1);
        let snapshot = WorldSnapshot::capture(&world, &bounds);
        assert!(!snapshot.block_state(outside).is_air());
    }
}
