//! JSON scene descriptions for the CLI.
//!
//! A scene names a block palette, places blocks into a [`MemoryWorld`] and
//! lists timed edits to replay against a running capture.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{BlockEventBus, BlockState, FluidState, MemoryWorld, Rgb, SimpleModels};
use crate::schema::{BlockPos, CaptureBounds, ChunkPos, VcapSettings};

fn default_true() -> bool {
    true
}

fn default_level() -> u8 {
    8
}

/// Properties of one palette block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDef {
    #[serde(default = "default_true")]
    pub opaque: bool,
    #[serde(default)]
    pub luminance: u8,
    /// Fluid held by the block, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluid: Option<String>,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tint: Option<Rgb>,
}

impl Default for BlockDef {
    fn default() -> Self {
        Self {
            opaque: true,
            luminance: 0,
            fluid: None,
            level: 8,
            tint: None,
        }
    }
}

/// Block placement, optionally filling the inclusive box `pos..=to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub pos: [i32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<[i32; 3]>,
    pub block: String,
}

/// Block change applied `time` seconds into the capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edit {
    pub time: f64,
    pub pos: [i32; 3],
    pub block: String,
}

/// A complete scene file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub settings: VcapSettings,
    pub palette: BTreeMap<String, BlockDef>,
    #[serde(default)]
    pub blocks: Vec<Placement>,
    #[serde(default)]
    pub edits: Vec<Edit>,
}

/// Scene loading errors.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Block {0} is not in the scene palette")]
    UnknownBlock(String),
    #[error("Edit at {time}s comes before the previous edit")]
    UnorderedEdit { time: f64 },
}

/// A scene instantiated in memory.
pub struct SceneWorld {
    pub world: Arc<MemoryWorld>,
    pub models: Arc<SimpleModels>,
    pub events: Arc<BlockEventBus>,
    states: HashMap<String, BlockState>,
}

impl SceneWorld {
    /// Resolve a palette name (or `minecraft:air`) to its state.
    pub fn state(&self, block: &str) -> Result<BlockState, SceneError> {
        if block == BlockState::AIR_ID {
            return Ok(BlockState::air());
        }
        self.states
            .get(block)
            .cloned()
            .ok_or_else(|| SceneError::UnknownBlock(block.to_string()))
    }

    /// Apply an edit to the live world, publishing a block event.
    pub fn apply(&self, edit: &Edit) -> Result<(), SceneError> {
        let state = self.state(&edit.block)?;
        self.world.set_block(BlockPos::from(edit.pos), state);
        Ok(())
    }
}

impl Scene {
    /// Build the world. Every chunk in the capture bounds is loaded.
    pub fn build(&self) -> Result<SceneWorld, SceneError> {
        let mut states = HashMap::new();
        let mut models = SimpleModels::new();
        for (raw_id, (name, def)) in self.palette.iter().enumerate() {
            let mut state = BlockState::new(name, raw_id as u32 + 1)
                .with_opaque(def.opaque)
                .with_luminance(def.luminance);
            if let Some(fluid) = &def.fluid {
                state = state.with_fluid(FluidState::new(fluid, def.level));
            }
            if let Some(tint) = def.tint {
                models = models.with_tint(name, tint);
            }
            states.insert(name.clone(), state);
        }

        let events = BlockEventBus::new();
        let bounds = &self.settings.bounds;
        let world = MemoryWorld::new(bounds.sections.clone()).with_events(Arc::clone(&events));
        for chunk in bounds.chunks() {
            world.load_chunk(chunk);
        }

        let scene = SceneWorld {
            world: Arc::new(world),
            models: Arc::new(models),
            events,
            states,
        };

        for placement in &self.blocks {
            let state = scene.state(&placement.block)?;
            let min = BlockPos::from(placement.pos);
            let max = placement.to.map(BlockPos::from).unwrap_or(min);
            scene.world.fill(min, max, &state);
        }

        let mut last = f64::NEG_INFINITY;
        for edit in &self.edits {
            scene.state(&edit.block)?;
            if edit.time < last {
                return Err(SceneError::UnorderedEdit { time: edit.time });
            }
            last = edit.time;
        }

        Ok(scene)
    }

    /// A small scene exercising blocks, glass, lights, tinting and water.
    pub fn example() -> Self {
        let mut palette = BTreeMap::new();
        palette.insert("minecraft:stone".to_string(), BlockDef::default());
        palette.insert(
            "minecraft:grass_block".to_string(),
            BlockDef {
                tint: Some([124, 189, 107]),
                ..Default::default()
            },
        );
        palette.insert(
            "minecraft:glass".to_string(),
            BlockDef {
                opaque: false,
                ..Default::default()
            },
        );
        palette.insert(
            "minecraft:glowstone".to_string(),
            BlockDef {
                luminance: 15,
                ..Default::default()
            },
        );
        palette.insert(
            "minecraft:water".to_string(),
            BlockDef {
                opaque: false,
                fluid: Some("minecraft:water".to_string()),
                tint: Some([63, 118, 228]),
                ..Default::default()
            },
        );

        let settings = VcapSettings::new(
            CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..1),
        );

        Self {
            settings,
            palette,
            blocks: vec![
                Placement {
                    pos: [0, 0, 0],
                    to: Some([15, 0, 15]),
                    block: "minecraft:stone".to_string(),
                },
                Placement {
                    pos: [0, 1, 0],
                    to: Some([15, 1, 15]),
                    block: "minecraft:grass_block".to_string(),
                },
                Placement {
                    pos: [4, 2, 4],
                    to: Some([6, 2, 6]),
                    block: "minecraft:water".to_string(),
                },
                Placement {
                    pos: [10, 2, 10],
                    to: None,
                    block: "minecraft:glowstone".to_string(),
                },
            ],
            edits: vec![
                Edit {
                    time: 0.5,
                    pos: [8, 2, 8],
                    block: "minecraft:glass".to_string(),
                },
                Edit {
                    time: 1.0,
                    pos: [8, 3, 8],
                    block: "minecraft:glass".to_string(),
                },
                Edit {
                    time: 1.5,
                    pos: [10, 2, 10],
                    block: "minecraft:air".to_string(),
                },
            ],
        }
    }
}
