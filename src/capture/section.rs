//! Section encoder - palette compression of 16x16x16 voxel sections.
//!
//! Voxel `i` of a section lives at `(y * 16 + z) * 16 + x`. Every voxel gets
//! a mesh ID (through the shared [`ExportContext`]) and one tint sample.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use super::fluid::{FluidDomain, FluidRegistry};
use super::identity::{EMPTY_MESH, ExportContext, FLUID_MESH_NAME, ModelEntry};
use crate::schema::{BlockPos, ChunkPos, Direction, FaceMask, SECTION_VOLUME, SectionPos};
use crate::world::{BlockView, ModelProvider, Rgb};

/// Most colors one section can hold.
///
/// Voxel colors are stored as byte offsets into the flat RGB palette.
pub const MAX_SECTION_COLORS: usize = 85;

/// Computes the appearance of single voxels.
#[derive(Clone, Copy)]
pub struct BlockEncoder<'a> {
    pub world: &'a dyn BlockView,
    pub models: &'a dyn ModelProvider,
    pub context: &'a ExportContext,
}

impl<'a> BlockEncoder<'a> {
    pub fn new(
        world: &'a dyn BlockView,
        models: &'a dyn ModelProvider,
        context: &'a ExportContext,
    ) -> Self {
        Self {
            world,
            models,
            context,
        }
    }

    /// Appearance of the block at `pos`, or `None` for air.
    pub fn entry(&self, pos: BlockPos) -> Option<ModelEntry> {
        let state = self.world.block_state(pos);
        if state.is_air() {
            return None;
        }
        let mut faces = FaceMask::NONE;
        for direction in Direction::ALL {
            faces.set(direction, self.models.should_draw_side(self.world, &state, pos, direction));
        }
        Some(ModelEntry::new(self.models.model(&state), state).with_faces(faces))
    }

    /// Mesh ID of the block at `pos`, ignoring fluid domains.
    pub fn encode_block(&self, pos: BlockPos) -> String {
        match self.entry(pos) {
            Some(entry) => self.context.add_block(&entry),
            None => EMPTY_MESH.to_string(),
        }
    }

    pub fn color(&self, pos: BlockPos) -> Rgb {
        let state = self.world.block_state(pos);
        self.models.block_color(self.world, &state, pos)
    }

    /// Capture the fluid body containing `pos`.
    pub fn fluid_domain(&self, pos: BlockPos) -> Option<FluidDomain> {
        FluidDomain::capture(self.world, self.models, self.context.settings(), pos)
    }

    /// Mesh ID of a voxel of an intracoded frame.
    ///
    /// With static fluid export, fluid voxels resolve through `fluids`: the
    /// domain root carries the body mesh and other members are empty.
    fn encode_voxel(&self, pos: BlockPos, fluids: Option<&FluidRegistry>) -> String {
        if let Some(registry) = fluids {
            if self.context.settings().fluid_mode.export_static()
                && self.world.block_state(pos).has_fluid()
            {
                if let Some(domain) = registry.domain_for(pos, || self.fluid_domain(pos)) {
                    if domain.root() == pos {
                        return self.context.add_extra_model(FLUID_MESH_NAME, domain.mesh());
                    }
                    return EMPTY_MESH.to_string();
                }
            }
        }
        self.encode_block(pos)
    }

    /// Encode one section.
    ///
    /// Voxels are encoded in parallel; palettes are then assembled in voxel
    /// order so the result does not depend on scheduling.
    pub fn encode_section(&self, section: SectionPos, fluids: Option<&FluidRegistry>) -> EncodedSection {
        log::debug!("Exporting section {section}");
        let voxels: Vec<(String, Rgb)> = (0..SECTION_VOLUME)
            .into_par_iter()
            .map(|i| {
                let pos = section.block_at(i);
                (self.encode_voxel(pos, fluids), self.color(pos))
            })
            .collect();

        let mut encoded = EncodedSection::new(section);
        let mut lookup: HashMap<String, u32> = HashMap::new();
        let mut colors = ColorPalette::default();
        for (id, color) in voxels {
            let index = *lookup.entry(id).or_insert_with_key(|id| {
                encoded.palette.push(id.clone());
                encoded.palette.len() as u32 - 1
            });
            encoded.blocks.push(index);
            encoded.colors.push(colors.index_of(color));
        }
        encoded.color_palette = colors.into_colors();
        encoded
    }
}

/// Section color palette with a hard size cap.
#[derive(Debug, Default)]
pub struct ColorPalette {
    colors: Vec<Rgb>,
}

impl ColorPalette {
    /// Index of `color`, adding it if there is room. A full palette returns
    /// the nearest existing color.
    pub fn index_of(&mut self, color: Rgb) -> u8 {
        if let Some(i) = self.colors.iter().position(|c| *c == color) {
            return i as u8;
        }
        if self.colors.len() < MAX_SECTION_COLORS {
            self.colors.push(color);
            return (self.colors.len() - 1) as u8;
        }
        let distance = |c: &Rgb| -> u32 {
            c.iter()
                .zip(color)
                .map(|(a, b)| (i32::from(*a) - i32::from(b)).unsigned_abs().pow(2))
                .sum()
        };
        self.colors
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| distance(c))
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    pub fn into_colors(self) -> Vec<Rgb> {
        self.colors
    }
}

/// A palette-compressed section.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedSection {
    pub pos: SectionPos,
    /// Mesh IDs referenced by this section.
    pub palette: Vec<String>,
    /// Per-voxel index into `palette`.
    pub blocks: Vec<u32>,
    pub color_palette: Vec<Rgb>,
    /// Per-voxel index into `color_palette`.
    pub colors: Vec<u8>,
}

impl EncodedSection {
    fn new(pos: SectionPos) -> Self {
        Self {
            pos,
            palette: Vec::new(),
            blocks: Vec::with_capacity(SECTION_VOLUME),
            color_palette: Vec::new(),
            colors: Vec::with_capacity(SECTION_VOLUME),
        }
    }

    /// Mesh ID of voxel `index`.
    pub fn model_at(&self, index: usize) -> Option<&str> {
        let palette_index = *self.blocks.get(index)? as usize;
        self.palette.get(palette_index).map(String::as_str)
    }

    pub fn color_at(&self, index: usize) -> Option<Rgb> {
        let color_index = *self.colors.get(index)? as usize;
        self.color_palette.get(color_index).copied()
    }
}

/// Progress of an intracoded capture, reported after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProgress {
    pub chunk: ChunkPos,
    /// Chunks finished so far, including this one.
    pub captured: usize,
    pub total: usize,
}

/// Encode every loaded section inside the capture bounds.
///
/// Unloaded chunks and sections are skipped. Chunks are encoded in
/// parallel; the result is ordered by chunk (x-major) then section Y.
pub fn capture_sections(
    encoder: &BlockEncoder<'_>,
    fluids: Option<&FluidRegistry>,
    progress: Option<&(dyn Fn(CaptureProgress) + Sync)>,
) -> Vec<EncodedSection> {
    let bounds = &encoder.context.settings().bounds;
    let world = encoder.world;
    let chunks: Vec<ChunkPos> = bounds.chunks().filter(|c| world.is_chunk_loaded(*c)).collect();
    let total = chunks.len();
    let captured = AtomicUsize::new(0);

    let per_chunk: Vec<Vec<EncodedSection>> = chunks
        .par_iter()
        .map(|chunk| {
            log::debug!("Exporting chunk [{}, {}]", chunk.x, chunk.z);
            let sections: Vec<EncodedSection> = bounds
                .sections
                .clone()
                .map(|y| SectionPos::new(chunk.x, y, chunk.z))
                .filter(|s| world.is_section_loaded(*s))
                .map(|s| encoder.encode_section(s, fluids))
                .collect();

            let count = captured.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(report) = progress {
                report(CaptureProgress {
                    chunk: *chunk,
                    captured: count,
                    total,
                });
            }
            sections
        })
        .collect();

    per_chunk.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CaptureBounds, FluidMode, VcapSettings};
    use crate::world::{BlockState, FluidState, MemoryWorld, SimpleModels, WHITE};
    use parking_lot::Mutex;

    fn settings() -> VcapSettings {
        VcapSettings::new(CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..1))
    }

    fn stone() -> BlockState {
        BlockState::new("minecraft:stone", 1)
    }

    #[test]
    fn test_single_block_section() {
        let world = MemoryWorld::new(0..1);
        world.set_block(BlockPos::new(1, 2, 3), stone());
        let models = SimpleModels::new();
        let context = ExportContext::new(settings());
        let encoder = BlockEncoder::new(&world, &models, &context);

        let section = encoder.encode_section(SectionPos::new(0, 0, 0), None);
        assert_eq!(section.palette, vec!["empty".to_string(), "minecraft_stone#1.3f".to_string()]);
        assert_eq!(section.blocks.len(), SECTION_VOLUME);
        let index = BlockPos::new(1, 2, 3).section_index();
        assert_eq!(index, (2 * 16 + 3) * 16 + 1);
        assert_eq!(section.model_at(index), Some("minecraft_stone#1.3f"));
        assert_eq!(section.model_at(0), Some("empty"));
        assert_eq!(section.color_palette, vec![WHITE]);
    }

    #[test]
    fn test_neighbors_hide_faces() {
        let world = MemoryWorld::new(0..1);
        world.fill(BlockPos::new(0, 0, 0), BlockPos::new(1, 0, 0), &stone());
        let models = SimpleModels::new();
        let context = ExportContext::new(settings());
        let encoder = BlockEncoder::new(&world, &models, &context);

        let west = encoder.entry(BlockPos::new(0, 0, 0)).unwrap();
        assert!(!west.faces.contains(Direction::East));
        assert!(west.faces.contains(Direction::West));
        assert!(encoder.entry(BlockPos::new(5, 5, 5)).is_none());
        assert_ne!(
            encoder.encode_block(BlockPos::new(0, 0, 0)),
            encoder.encode_block(BlockPos::new(1, 0, 0))
        );
    }

    #[test]
    fn test_tint_sampled() {
        let world = MemoryWorld::new(0..1);
        world.set_block(BlockPos::new(0, 0, 0), BlockState::new("minecraft:grass_block", 2));
        let models = SimpleModels::new().with_tint("minecraft:grass_block", [10, 200, 10]);
        let context = ExportContext::new(settings());
        let encoder = BlockEncoder::new(&world, &models, &context);
        let section = encoder.encode_section(SectionPos::new(0, 0, 0), None);
        assert_eq!(section.color_at(0), Some([10, 200, 10]));
        assert_eq!(section.color_at(1), Some(WHITE));
    }

    #[test]
    fn test_color_palette_cap() {
        let mut palette = ColorPalette::default();
        for i in 0..MAX_SECTION_COLORS {
            assert_eq!(palette.index_of([i as u8 * 3, 0, 0]) as usize, i);
        }
        // Full: nearest wins
        assert_eq!(palette.index_of([7, 0, 0]), 2);
        assert_eq!(palette.into_colors().len(), MAX_SECTION_COLORS);
    }

    #[test]
    fn test_static_fluid_root_only() {
        let world = MemoryWorld::new(0..1);
        let water = BlockState::new("minecraft:water", 3)
            .with_opaque(false)
            .with_fluid(FluidState::new("minecraft:water", 8));
        world.fill(BlockPos::new(0, 0, 0), BlockPos::new(2, 0, 0), &water);

        let models = SimpleModels::new();
        let context = ExportContext::new(settings().with_fluid_mode(FluidMode::Static));
        let encoder = BlockEncoder::new(&world, &models, &context);
        let registry = FluidRegistry::new();
        let section = encoder.encode_section(SectionPos::new(0, 0, 0), Some(&registry));

        assert_eq!(section.model_at(0), Some("fluid.0"));
        assert_eq!(section.model_at(1), Some("empty"));
        assert_eq!(section.model_at(2), Some("empty"));
        assert_eq!(context.extra_models().len(), 1);
        assert_eq!(registry.into_map().len(), 3);
    }

    #[test]
    fn test_capture_sections_progress() {
        let world = MemoryWorld::new(0..2);
        world.set_block(BlockPos::new(0, 0, 0), stone());
        world.set_block(BlockPos::new(40, 0, 0), stone());
        let models = SimpleModels::new();
        let bounds = CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(2, 2)).with_sections(0..2);
        let context = ExportContext::new(VcapSettings::new(bounds));
        let encoder = BlockEncoder::new(&world, &models, &context);

        let reports = Mutex::new(Vec::new());
        let report: &(dyn Fn(CaptureProgress) + Sync) = &|p| reports.lock().push(p);
        let sections = capture_sections(&encoder, None, Some(report));

        // Only chunk (0, 0) is loaded and in bounds
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].pos, SectionPos::new(0, 0, 0));
        assert_eq!(sections[1].pos, SectionPos::new(0, 1, 0));
        let reports = reports.into_inner();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].total, 1);
    }
}
