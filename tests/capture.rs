//! End-to-end capture tests: drive a session against an in-memory world,
//! save it and read the archive back.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

use proptest::prelude::*;

use vcap::{
    archive::{ArchiveReader, DecodedFrame, LoadedArchive, Recovery},
    capture::{BlockEncoder, CaptureError, EMPTY_MESH, ExportContext, IFrame, Mesh, ModelEntry, VcapExporter},
    schema::{BlockPos, CaptureBounds, ChunkPos, FluidMode, SECTION_VOLUME, VcapSettings},
    world::{BlockEventBus, BlockState, FluidState, MemoryWorld, SimpleModels},
};

fn stone() -> BlockState {
    BlockState::new("minecraft:stone", 1)
}

fn glass() -> BlockState {
    BlockState::new("minecraft:glass", 2).with_opaque(false)
}

fn glowstone() -> BlockState {
    BlockState::new("minecraft:glowstone", 3).with_luminance(15)
}

fn water() -> BlockState {
    BlockState::new("minecraft:water", 4)
        .with_opaque(false)
        .with_fluid(FluidState::new("minecraft:water", 8))
}

struct Harness {
    world: Arc<MemoryWorld>,
    models: Arc<SimpleModels>,
    exporter: VcapExporter,
    _bus: Arc<BlockEventBus>,
}

/// One chunk, one section: a stone floor with a small pool.
fn harness(fluid_mode: FluidMode) -> Harness {
    let bus = BlockEventBus::new();
    let world = Arc::new(MemoryWorld::new(0..1).with_events(Arc::clone(&bus)));
    world.fill(BlockPos::new(0, 0, 0), BlockPos::new(15, 0, 15), &stone());
    world.fill(BlockPos::new(10, 1, 10), BlockPos::new(12, 1, 12), &water());

    let bounds = CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..1);
    let settings = VcapSettings::new(bounds).with_fluid_mode(fluid_mode);
    let models = Arc::new(SimpleModels::new().with_tint("minecraft:water", [63, 118, 228]));
    let mut exporter = VcapExporter::new(world.clone(), models.clone(), settings).unwrap();
    exporter.capture_i_frame(None).unwrap();
    exporter.listen(&bus);
    Harness {
        world,
        models,
        exporter,
        _bus: bus,
    }
}

fn save(exporter: &mut VcapExporter) -> LoadedArchive {
    let (out, _) = exporter.save(Cursor::new(Vec::new())).unwrap();
    ArchiveReader::new(Cursor::new(out.into_inner()))
        .unwrap()
        .load(|_| Recovery::Abort)
        .unwrap()
}

/// Replay decoded frames into the mesh ID at every voxel after each frame.
fn replay(frames: &[DecodedFrame]) -> Vec<BTreeMap<BlockPos, String>> {
    let mut state = BTreeMap::new();
    let mut out = Vec::new();
    for frame in frames {
        match frame {
            DecodedFrame::Intracoded { sections, .. } => {
                state.clear();
                for section in sections {
                    for index in 0..SECTION_VOLUME {
                        let mesh = section.model_at(index).unwrap_or(EMPTY_MESH);
                        state.insert(section.pos.block_at(index), mesh.to_string());
                    }
                }
            }
            DecodedFrame::Predicted { blocks, .. } => {
                for block in blocks {
                    state.insert(block.pos, block.mesh.clone());
                }
            }
        }
        out.push(state.clone());
    }
    out
}

fn assert_replay_matches_chain(exporter: &VcapExporter, loaded: &LoadedArchive) {
    let replayed = replay(&loaded.frames);
    assert_eq!(replayed.len(), exporter.frames().len());
    for (index, voxels) in replayed.iter().enumerate() {
        for (pos, mesh) in voxels {
            assert_eq!(
                exporter.frames().model_at(index, *pos).unwrap(),
                mesh,
                "frame {index} at {pos}"
            );
        }
    }
}

/// What a mesh ID stands for: an interned block appearance or generated geometry.
#[derive(Debug, PartialEq)]
enum Appearance {
    Block(ModelEntry),
    Generated(Mesh),
}

struct Palettes {
    blocks: BTreeMap<String, ModelEntry>,
    generated: BTreeMap<String, Mesh>,
}

impl Palettes {
    fn of(context: &ExportContext) -> Self {
        Self {
            blocks: context.model_entries(),
            generated: context.extra_models(),
        }
    }

    fn resolve(&self, id: &str) -> Appearance {
        if id == EMPTY_MESH {
            return Appearance::Generated(Mesh::default());
        }
        if let Some(entry) = self.blocks.get(id) {
            return Appearance::Block(entry.clone());
        }
        let mesh = self.generated.get(id).unwrap_or_else(|| panic!("unknown mesh {id}"));
        Appearance::Generated(mesh.clone())
    }
}

/// The last frame of the chain must look like a fresh capture of the world.
fn assert_chain_matches_world(h: &Harness) {
    let fresh = ExportContext::new(h.exporter.context().settings().clone());
    let encoder = BlockEncoder::new(h.world.as_ref(), h.models.as_ref(), &fresh);
    let snapshot = IFrame::capture(&encoder, 0.0, None);

    let frames = h.exporter.frames();
    let last = frames.len() - 1;
    let live = Palettes::of(h.exporter.context());
    let truth = Palettes::of(&fresh);
    for section in snapshot.sections() {
        for index in 0..SECTION_VOLUME {
            let pos = section.pos.block_at(index);
            let expected = truth.resolve(section.model_at(index).unwrap());
            let actual = live.resolve(frames.model_at(last, pos).unwrap());
            assert_eq!(actual, expected, "frame {last} at {pos}");
        }
    }
}

fn assert_palette_complete(loaded: &LoadedArchive) {
    for voxels in replay(&loaded.frames) {
        for mesh in voxels.values() {
            assert!(loaded.meshes.contains_key(mesh), "missing mesh {mesh}");
        }
    }
    assert!(loaded.meshes.contains_key(EMPTY_MESH));

    for (id, mesh) in &loaded.meshes {
        for material in mesh.material_names() {
            assert!(loaded.materials.contains_key(material), "{id} uses missing {material}");
        }
    }
    for (name, material) in &loaded.materials {
        for texture in material.texture_refs() {
            assert!(loaded.textures.contains_key(texture), "{name} uses missing {texture}");
        }
    }
}

#[test]
fn test_archive_replays_frame_chain() {
    let mut h = harness(FluidMode::Static);
    h.world.set_block(BlockPos::new(3, 1, 3), glass());
    h.world.set_block(BlockPos::new(4, 1, 3), glowstone());
    h.exporter.tick_at(0.5).unwrap();
    h.world.set_block(BlockPos::new(3, 1, 3), BlockState::air());
    h.world.set_block(BlockPos::new(7, 0, 7), BlockState::air());
    h.exporter.tick_at(1.0).unwrap();
    assert_eq!(h.exporter.frames().len(), 3);

    let loaded = save(&mut h.exporter);
    let times: Vec<f64> = loaded.frames.iter().map(DecodedFrame::time).collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0]);
    assert_replay_matches_chain(&h.exporter, &loaded);
    assert_palette_complete(&loaded);

    let glass_id = h.exporter.frames().model_at(1, BlockPos::new(3, 1, 3)).unwrap();
    let meta = loaded.meta.unwrap();
    assert_eq!(meta.block_types[glass_id], "minecraft:glass");
}

#[test]
fn test_removal_reveals_neighbor_faces() {
    let mut h = harness(FluidMode::None);
    let below = BlockPos::new(7, 0, 7);

    // Digging a hole exposes the side faces of the surrounding floor
    h.world.set_block(below, BlockState::air());
    h.exporter.tick_at(0.5).unwrap();

    let frames = h.exporter.frames();
    assert_eq!(frames.model_at(1, below).unwrap(), EMPTY_MESH);
    let side = BlockPos::new(8, 0, 7);
    assert_ne!(frames.model_at(1, side).unwrap(), frames.model_at(0, side).unwrap());
    // Untouched blocks are inherited from the intracoded frame
    let far = BlockPos::new(1, 0, 1);
    assert_eq!(frames.model_at(1, far).unwrap(), frames.model_at(0, far).unwrap());
}

#[test]
fn test_identical_appearance_shares_id() {
    let mut h = harness(FluidMode::None);
    h.world.set_block(BlockPos::new(2, 1, 2), stone());
    h.world.set_block(BlockPos::new(5, 1, 5), stone());
    h.exporter.tick_at(0.5).unwrap();

    let frames = h.exporter.frames();
    assert_eq!(
        frames.model_at(1, BlockPos::new(2, 1, 2)).unwrap(),
        frames.model_at(1, BlockPos::new(5, 1, 5)).unwrap()
    );
}

#[test]
fn test_unchanged_water_keeps_one_mesh() {
    let mut h = harness(FluidMode::Dynamic);
    let fluid_meshes = |exporter: &VcapExporter| {
        exporter
            .context()
            .extra_models()
            .keys()
            .filter(|id| id.starts_with("fluid."))
            .count()
    };
    assert_eq!(fluid_meshes(&h.exporter), 1);

    // Re-placing the same water re-captures the body, which matches
    h.world.set_block(BlockPos::new(11, 1, 11), water());
    h.exporter.tick_at(0.5).unwrap();
    assert_eq!(fluid_meshes(&h.exporter), 1);

    // Breaking the pool in half changes it
    h.world.set_block(BlockPos::new(11, 1, 10), BlockState::air());
    h.world.set_block(BlockPos::new(11, 1, 11), BlockState::air());
    h.world.set_block(BlockPos::new(11, 1, 12), BlockState::air());
    h.exporter.tick_at(1.0).unwrap();
    assert!(fluid_meshes(&h.exporter) > 1);
    assert_chain_matches_world(&h);

    let loaded = save(&mut h.exporter);
    assert_replay_matches_chain(&h.exporter, &loaded);
    assert_palette_complete(&loaded);
}

#[test]
fn test_outside_region_rejected() {
    let h = harness(FluidMode::Static);
    let outside = BlockPos::new(16, 0, 0);
    assert!(matches!(
        h.exporter.frames().model_at(0, outside),
        Err(CaptureError::OutOfBounds { .. })
    ));

    // Edits outside the region never reach the dirty set
    h.world.set_block(outside, stone());
    h.world.set_block(BlockPos::new(0, 20, 0), stone());
    assert_eq!(h.exporter.dirty_count(), 0);
}

#[test]
fn test_manual_predicted_frame() {
    let mut h = harness(FluidMode::Static);
    h.exporter.stop_listening();
    let pos = BlockPos::new(1, 1, 1);
    h.world.set_block(pos, glass());

    let index = h.exporter.capture_p_frame(&HashSet::from([pos]), 0.25).unwrap();
    assert_eq!(index, 1);
    assert!(h.exporter.frames().model_at(1, pos).unwrap().starts_with("minecraft_glass#"));
    assert_eq!(h.exporter.frames().model_at(0, pos).unwrap(), EMPTY_MESH);
}

fn edit_strategy() -> impl Strategy<Value = Vec<Vec<(BlockPos, u8)>>> {
    let edit = (0..16i32, 0..4i32, 0..16i32, 0..5u8).prop_map(|(x, y, z, b)| (BlockPos::new(x, y, z), b));
    prop::collection::vec(prop::collection::vec(edit, 1..6), 1..5)
}

fn block(kind: u8) -> BlockState {
    match kind {
        0 => BlockState::air(),
        1 => stone(),
        2 => glass(),
        3 => glowstone(),
        _ => water(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn test_random_edits_replay(batches in edit_strategy(), dynamic in any::<bool>()) {
        let mode = if dynamic { FluidMode::Dynamic } else { FluidMode::Static };
        let mut h = harness(mode);
        for (i, batch) in batches.iter().enumerate() {
            for (pos, kind) in batch {
                h.world.set_block(*pos, block(*kind));
            }
            h.exporter.tick_at(i as f64 + 1.0).unwrap();
            // Static bodies are frozen at the intracoded frame
            if dynamic {
                assert_chain_matches_world(&h);
            }
        }

        let loaded = save(&mut h.exporter);
        prop_assert_eq!(loaded.frames.len(), h.exporter.frames().len());
        assert_replay_matches_chain(&h.exporter, &loaded);
        assert_palette_complete(&loaded);
    }
}
