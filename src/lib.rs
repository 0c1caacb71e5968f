//! Vcap - Voxel world delta capture with deduplicated mesh palettes.
//!
//! This crate records a region of a block world over time into a portable
//! archive for import into 3D tools. The first frame is a full snapshot;
//! later frames only store the blocks whose appearance changed.
//!
//! # Architecture
//!
//! The crate is split into four modules:
//!
//! - `schema`: Coordinates, capture settings and material types
//! - `world`: The traits a host world implements, plus an in-memory world
//! - `capture`: Appearance palette, section encoding, frames and the session
//! - `archive`: The container format, its writer and reader
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vcap::{
//!     capture::VcapExporter,
//!     schema::{BlockPos, CaptureBounds, ChunkPos, VcapSettings},
//!     world::{BlockEventBus, BlockState, MemoryWorld, SimpleModels},
//! };
//!
//! let bus = BlockEventBus::new();
//! let world = Arc::new(MemoryWorld::new(0..4).with_events(bus.clone()));
//! world.set_block(BlockPos::new(0, 0, 0), BlockState::new("minecraft:stone", 1));
//!
//! let bounds = CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(2, 2));
//! let mut exporter =
//!     VcapExporter::new(world.clone(), Arc::new(SimpleModels::new()), VcapSettings::new(bounds))?;
//! exporter.capture_i_frame(None)?;
//! exporter.listen(&bus);
//!
//! world.set_block(BlockPos::new(1, 0, 0), BlockState::new("minecraft:stone", 1));
//! exporter.tick_at(0.05)?;
//!
//! let stats = exporter.save_to_path("capture.vcap")?;
//! println!("{stats}");
//! # Ok::<(), vcap::capture::CaptureError>(())
//! ```

pub mod archive;
pub mod capture;
pub mod schema;
pub mod world;

// Re-export commonly used types
pub use archive::{ArchiveReader, ArchiveStats};
pub use capture::{CaptureError, ExportContext, FrameChain, VcapExporter};
pub use schema::{BlockPos, CaptureBounds, VcapSettings};
