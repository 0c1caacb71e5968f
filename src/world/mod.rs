//! World module - The block world a capture reads from.
//!
//! The capture engine never talks to a game directly. It sees the world
//! through three seams:
//!
//! - [`BlockView`]: loaded-chunk queries and per-voxel block state lookup
//! - [`ModelProvider`]: baked geometry, face culling, tint colors and fluid meshing
//! - [`BlockEventBus`]: the stream of block mutations a live capture listens to
//!
//! [`MemoryWorld`] and [`SimpleModels`] implement these seams in memory for
//! the CLI, tests and benchmarks.

mod events;
mod memory;
mod scene;
mod snapshot;

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::schema::{BlockPos, ChunkPos, Direction, SectionPos};

pub use events::{BlockEvent, BlockEventBus, Subscription};
pub use memory::{MemoryWorld, SimpleModels};
pub use scene::{BlockDef, Edit, Placement, Scene, SceneError, SceneWorld};
pub use snapshot::WorldSnapshot;

/// RGB tint sample.
pub type Rgb = [u8; 3];

/// Untinted color.
pub const WHITE: Rgb = [255, 255, 255];

/// Fluid occupying a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FluidState {
    /// Namespaced fluid identifier.
    pub fluid: Arc<str>,
    /// Fluid height, 8 for a source block.
    pub level: u8,
}

impl FluidState {
    pub fn new(fluid: &str, level: u8) -> Self {
        Self {
            fluid: Arc::from(fluid),
            level,
        }
    }

    pub fn is_of(&self, fluid: &str) -> bool {
        &*self.fluid == fluid
    }
}

/// A block state: a block identifier plus the properties the capture
/// engine cares about.
///
/// `raw_id` uniquely identifies the state among all states of the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockState {
    pub block: Arc<str>,
    pub raw_id: u32,
    pub opaque: bool,
    pub luminance: u8,
    pub fluid: Option<FluidState>,
}

impl BlockState {
    pub const AIR_ID: &'static str = "minecraft:air";

    /// An opaque, non-emissive state with no fluid.
    pub fn new(block: &str, raw_id: u32) -> Self {
        Self {
            block: Arc::from(block),
            raw_id,
            opaque: true,
            luminance: 0,
            fluid: None,
        }
    }

    pub fn air() -> Self {
        Self {
            opaque: false,
            ..Self::new(Self::AIR_ID, 0)
        }
    }

    pub fn with_opaque(mut self, opaque: bool) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_luminance(mut self, luminance: u8) -> Self {
        self.luminance = luminance;
        self
    }

    pub fn with_fluid(mut self, fluid: FluidState) -> Self {
        self.fluid = Some(fluid);
        self
    }

    pub fn is_air(&self) -> bool {
        &*self.block == Self::AIR_ID
    }

    /// Whether this block is the fluid itself (as opposed to, say, a
    /// waterlogged block that also holds fluid).
    pub fn is_fluid_block(&self) -> bool {
        self.fluid.as_ref().is_some_and(|f| f.fluid == self.block)
    }

    pub fn has_fluid(&self) -> bool {
        self.fluid.is_some()
    }

    pub fn fluid_is(&self, fluid: &str) -> bool {
        self.fluid.as_ref().is_some_and(|f| f.is_of(fluid))
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.block, self.raw_id)
    }
}

/// Identity of a baked model, compared by reference in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelHandle(pub u64);

/// One vertex of a baked quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// A baked quad in block-local space (`0.0..=1.0` on each axis).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub vertices: [Vertex; 4],
    /// The quad samples the per-block tint color.
    pub tinted: bool,
}

/// Receives quads emitted by a renderer.
pub trait QuadSink {
    fn push_quad(&mut self, quad: &Quad);
}

impl QuadSink for Vec<Quad> {
    fn push_quad(&mut self, quad: &Quad) {
        self.push(*quad);
    }
}

/// Read access to block data.
///
/// Unloaded or out-of-world positions read as air.
pub trait BlockView: Send + Sync {
    fn block_state(&self, pos: BlockPos) -> BlockState;

    fn is_chunk_loaded(&self, chunk: ChunkPos) -> bool;

    fn is_section_loaded(&self, section: SectionPos) -> bool {
        self.is_chunk_loaded(section.chunk()) && self.section_range().contains(&section.y)
    }

    /// Half-open range of section Y coordinates the world has.
    fn section_range(&self) -> Range<i32>;
}

/// Baked-model queries.
pub trait ModelProvider: Send + Sync {
    /// The baked model used to render `state`.
    fn model(&self, state: &BlockState) -> ModelHandle;

    /// Quads of `state`'s model culled by `face`, or the unculled quads for `None`.
    fn quads(&self, state: &BlockState, face: Option<Direction>) -> Vec<Quad>;

    /// Whether the `side` face of the block at `pos` is visible.
    fn should_draw_side(
        &self,
        world: &dyn BlockView,
        state: &BlockState,
        pos: BlockPos,
        side: Direction,
    ) -> bool;

    /// Tint color sampled for the block at `pos`.
    fn block_color(&self, world: &dyn BlockView, state: &BlockState, pos: BlockPos) -> Rgb;

    /// Emit the fluid surface of the block at `pos` in block-local space.
    fn render_fluid(
        &self,
        world: &dyn BlockView,
        pos: BlockPos,
        state: &BlockState,
        sink: &mut dyn QuadSink,
    );
}
