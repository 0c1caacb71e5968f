//! Capture module - Turning a live block world into deduplicated frames.
//!
//! The pieces, leaves first:
//!
//! - [`ExportContext`]: the shared palette assigning one stable ID per
//!   distinct block appearance
//! - [`BlockEncoder`]: per-voxel appearance and palette-compressed sections
//! - [`FluidDomain`]: connected fluid bodies meshed as one unit
//! - [`FrameChain`]: intracoded and predicted frames linked by index
//! - [`VcapExporter`]: the session tying capture, listening and saving together

mod flood_fill;
mod fluid;
mod frame;
mod identity;
mod mesh;
mod section;
mod session;

pub use flood_fill::{flood_fill, neighbor_offsets};
pub use fluid::{FluidDomain, FluidRegistry};
pub use frame::{BlockUpdate, Frame, FrameChain, IFrame, INTRACODED_TYPE, PFrame, PREDICTED_TYPE};
pub use identity::{EMISSIVE_THRESHOLD, EMPTY_MESH, ExportContext, FLUID_MESH_NAME, ModelEntry, next_name};
pub use mesh::{
    FACE_LAYER_PREFIX, Face, FaceVertex, Mesh, MeshBuilder, MeshComparator, MeshKey, ObjError, face_layer_name,
};
pub use section::{
    BlockEncoder, CaptureProgress, ColorPalette, EncodedSection, MAX_SECTION_COLORS, capture_sections,
};
pub use session::{PendingFrame, SessionState, VcapExporter};

use crate::archive::ArchiveError;
use crate::schema::{BlockPos, ConfigError};

/// Capture errors.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Block {pos} is outside the captured region")]
    OutOfBounds { pos: BlockPos },
    #[error("No frame at index {0}")]
    UnknownFrame(usize),
    #[error("The intracoded frame was already captured")]
    IFrameAlreadyCaptured,
    #[error("No intracoded frame has been captured")]
    MissingIFrame,
    #[error("Cannot {action} in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
    #[error("Background capture failed")]
    BackgroundFailed,
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}
