//! Archive module - The Vcap container: layout, writer, reader and textures.

pub mod format;
mod reader;
mod texture;
mod writer;

pub use format::{DecodedBlock, DecodedFrame, FORMAT_VERSION, FormatError, VcapMeta};
pub use reader::{ArchiveReader, LoadedArchive, ParseError, ParseStage, Recovery, TextureData};
pub use texture::{
    AnimatedTexture, ExtractionFuture, ImageTexture, RenderQueue, ReplayTexture, StaticAtlas,
    TextureError, TextureSource, resolve_textures,
};
pub use writer::{ArchiveContents, ArchiveError, ArchiveStats, ArchiveWriter, write_archive};
