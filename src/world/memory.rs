//! In-memory world and cube-model provider.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    BlockEvent, BlockEventBus, BlockState, BlockView, ModelHandle, ModelProvider, Quad, QuadSink,
    Rgb, Vertex, WHITE,
};
use crate::schema::{BlockPos, ChunkPos, Direction};

/// A sparse block world held in memory.
///
/// Blocks that were never set read as air. Mutations are published to the
/// attached event bus, if any.
pub struct MemoryWorld {
    blocks: RwLock<HashMap<BlockPos, BlockState>>,
    loaded: RwLock<HashSet<ChunkPos>>,
    sections: Range<i32>,
    events: Option<Arc<BlockEventBus>>,
}

impl MemoryWorld {
    pub fn new(sections: Range<i32>) -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashSet::new()),
            sections,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<BlockEventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn load_chunk(&self, chunk: ChunkPos) {
        self.loaded.write().insert(chunk);
    }

    pub fn unload_chunk(&self, chunk: ChunkPos) {
        self.loaded.write().remove(&chunk);
    }

    /// Set a block, returning the previous state.
    ///
    /// The containing chunk is marked loaded.
    pub fn set_block(&self, pos: BlockPos, state: BlockState) -> Option<BlockState> {
        self.load_chunk(pos.chunk());
        let old = {
            let mut blocks = self.blocks.write();
            if state.is_air() {
                blocks.remove(&pos)
            } else {
                blocks.insert(pos, state.clone())
            }
        };
        if let Some(bus) = &self.events {
            bus.publish(&BlockEvent {
                pos,
                old: old.clone(),
                new: state,
            });
        }
        old
    }

    /// Fill the inclusive box `[min, max]` without publishing events.
    pub fn fill(&self, min: BlockPos, max: BlockPos, state: &BlockState) {
        let mut blocks = self.blocks.write();
        let mut loaded = self.loaded.write();
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    let pos = BlockPos::new(x, y, z);
                    loaded.insert(pos.chunk());
                    if state.is_air() {
                        blocks.remove(&pos);
                    } else {
                        blocks.insert(pos, state.clone());
                    }
                }
            }
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }
}

impl BlockView for MemoryWorld {
    fn block_state(&self, pos: BlockPos) -> BlockState {
        self.blocks
            .read()
            .get(&pos)
            .cloned()
            .unwrap_or_else(BlockState::air)
    }

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool {
        self.loaded.read().contains(&chunk)
    }

    fn section_range(&self) -> Range<i32> {
        self.sections.clone()
    }
}

/// Unit cube face corners, counter-clockwise seen from outside.
fn face_corners(face: Direction) -> [[f32; 3]; 4] {
    match face {
        Direction::North => [[1., 0., 0.], [0., 0., 0.], [0., 1., 0.], [1., 1., 0.]],
        Direction::South => [[0., 0., 1.], [1., 0., 1.], [1., 1., 1.], [0., 1., 1.]],
        Direction::East => [[1., 0., 1.], [1., 0., 0.], [1., 1., 0.], [1., 1., 1.]],
        Direction::West => [[0., 0., 0.], [0., 0., 1.], [0., 1., 1.], [0., 1., 0.]],
        Direction::Up => [[0., 1., 1.], [1., 1., 1.], [1., 1., 0.], [0., 1., 0.]],
        Direction::Down => [[0., 0., 0.], [1., 0., 0.], [1., 0., 1.], [0., 0., 1.]],
    }
}

const FACE_UVS: [[f32; 2]; 4] = [[0., 1.], [1., 1.], [1., 0.], [0., 0.]];

fn face_quad(face: Direction, height: f32, tinted: bool) -> Quad {
    let corners = face_corners(face);
    let vertices = std::array::from_fn(|i| {
        let [x, y, z] = corners[i];
        Vertex {
            position: [x, y * height, z],
            uv: FACE_UVS[i],
        }
    });
    Quad { vertices, tinted }
}

/// Full-cube models for every non-air, non-fluid block.
///
/// Fluids render as a surface whose height follows the fluid level.
#[derive(Debug, Clone, Default)]
pub struct SimpleModels {
    tints: HashMap<String, Rgb>,
}

impl SimpleModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tint every quad of `block` with `color`.
    pub fn with_tint(mut self, block: &str, color: Rgb) -> Self {
        self.tints.insert(block.to_string(), color);
        self
    }

    fn is_tinted(&self, block: &str) -> bool {
        self.tints.contains_key(block)
    }
}

impl ModelProvider for SimpleModels {
    fn model(&self, state: &BlockState) -> ModelHandle {
        ModelHandle(u64::from(state.raw_id))
    }

    fn quads(&self, state: &BlockState, face: Option<Direction>) -> Vec<Quad> {
        match face {
            Some(face) if !state.is_air() && !state.is_fluid_block() => {
                vec![face_quad(face, 1.0, self.is_tinted(&state.block))]
            }
            _ => Vec::new(),
        }
    }

    fn should_draw_side(
        &self,
        world: &dyn BlockView,
        state: &BlockState,
        pos: BlockPos,
        side: Direction,
    ) -> bool {
        let neighbor = world.block_state(pos.offset(side));
        if neighbor.opaque {
            return false;
        }
        // Transparent blocks of one kind merge into a single volume
        state.opaque || neighbor.block != state.block
    }

    fn block_color(&self, _world: &dyn BlockView, state: &BlockState, _pos: BlockPos) -> Rgb {
        self.tints.get(&*state.block).copied().unwrap_or(WHITE)
    }

    fn render_fluid(
        &self,
        world: &dyn BlockView,
        pos: BlockPos,
        state: &BlockState,
        sink: &mut dyn QuadSink,
    ) {
        let Some(fluid) = &state.fluid else {
            return;
        };
        let tinted = self.is_tinted(&fluid.fluid);
        let above = world.block_state(pos.offset(Direction::Up));
        let height = if above.fluid_is(&fluid.fluid) {
            1.0
        } else {
            f32::from(fluid.level.min(8)) / 9.0
        };

        for side in Direction::ALL {
            let neighbor = world.block_state(pos.offset(side));
            if neighbor.fluid_is(&fluid.fluid) || neighbor.opaque {
                continue;
            }
            sink.push_quad(&face_quad(side, height, tinted));
        }
    }
}
