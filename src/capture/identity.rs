//! Geometry identity: fingerprints of block appearances and the palettes
//! shared by a whole capture.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use super::mesh::{Mesh, MeshBuilder, MeshComparator, MeshKey};
use crate::archive::ReplayTexture;
use crate::schema::{FaceMask, Material, VcapSettings};
use crate::world::{BlockState, ModelHandle, ModelProvider, QuadSink};

/// Minimum luminance at which a block is emissive.
pub const EMISSIVE_THRESHOLD: u8 = 4;

/// Placeholder mesh with no geometry. Always present in an archive.
pub const EMPTY_MESH: &str = "empty";

/// Requested name of generated fluid meshes.
pub const FLUID_MESH_NAME: &str = "fluid.0";

/// How a block state looks at one position: its model, the faces left
/// visible by its neighbors, and render flags derived from the state.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model: ModelHandle,
    pub faces: FaceMask,
    pub transparent: bool,
    pub emissive: bool,
    pub state: Option<BlockState>,
}

impl ModelEntry {
    /// Entry for `state` with no visible faces.
    pub fn new(model: ModelHandle, state: BlockState) -> Self {
        Self {
            model,
            faces: FaceMask::NONE,
            transparent: !state.opaque,
            emissive: state.luminance >= EMISSIVE_THRESHOLD,
            state: Some(state),
        }
    }

    pub fn with_faces(mut self, faces: FaceMask) -> Self {
        self.faces = faces;
        self
    }

    /// Human-readable name, `namespace_path#stateHex`.
    pub fn base_name(&self) -> String {
        match &self.state {
            Some(state) => format!("{}#{:x}", state.block.replace(':', "_"), state.raw_id),
            None => format!("model#{:x}", self.model.0),
        }
    }

    /// Mesh of the visible faces plus the model's unculled quads.
    pub fn build_mesh(&self, models: &dyn ModelProvider) -> Mesh {
        let Some(state) = &self.state else {
            return Mesh::default();
        };
        let mut builder = MeshBuilder::new(self.transparent, self.emissive);
        for face in self.faces.iter() {
            for quad in models.quads(state, Some(face)) {
                builder.push_quad(&quad);
            }
        }
        for quad in models.quads(state, None) {
            builder.push_quad(&quad);
        }
        builder.finish()
    }

    fn state_key(&self) -> Option<(&str, u32)> {
        self.state.as_ref().map(|s| (&*s.block, s.raw_id))
    }
}

impl PartialEq for ModelEntry {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model
            && self.faces == other.faces
            && self.transparent == other.transparent
            && self.state_key() == other.state_key()
    }
}

impl Eq for ModelEntry {}

impl Hash for ModelEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.model.hash(state);
        self.faces.hash(state);
        self.transparent.hash(state);
        self.state_key().hash(state);
    }
}

/// Next candidate in a name collision chain: `name.N` becomes `name.N+1`,
/// anything else gets `.1` appended.
pub fn next_name(name: &str) -> String {
    if let Some((stem, suffix)) = name.rsplit_once('.') {
        if let Ok(n) = suffix.parse::<u64>() {
            if suffix.bytes().all(|b| b.is_ascii_digit()) {
                return format!("{stem}.{}", n + 1);
            }
        }
    }
    format!("{name}.1")
}

#[derive(Default)]
struct Palette {
    models: HashMap<ModelEntry, String>,
    by_id: BTreeMap<String, ModelEntry>,
    extra: BTreeMap<String, Mesh>,
    extra_ids: HashMap<MeshKey, String>,
}

impl Palette {
    fn is_taken(&self, name: &str) -> bool {
        name == EMPTY_MESH || self.by_id.contains_key(name) || self.extra.contains_key(name)
    }

    fn make_unique(&self, name: &str) -> String {
        let mut name = name.to_string();
        while self.is_taken(&name) {
            name = next_name(&name);
        }
        name
    }
}

/// Mutable state of one capture: the geometry palette, generated meshes,
/// materials and textures.
///
/// Shared between encoding threads; every palette mutation happens under
/// one lock so concurrent lookups of a new appearance agree on one ID.
pub struct ExportContext {
    settings: VcapSettings,
    palette: Mutex<Palette>,
    materials: Mutex<BTreeMap<String, Material>>,
    textures: Mutex<BTreeMap<String, Arc<dyn ReplayTexture>>>,
    comparator: MeshComparator,
}

impl ExportContext {
    pub fn new(settings: VcapSettings) -> Self {
        let comparator = MeshComparator::new(settings.fluid_epsilon);
        Self {
            settings,
            palette: Mutex::new(Palette::default()),
            materials: Mutex::new(BTreeMap::new()),
            textures: Mutex::new(BTreeMap::new()),
            comparator,
        }
    }

    pub fn settings(&self) -> &VcapSettings {
        &self.settings
    }

    /// Comparator deciding whether a re-captured fluid body is unchanged.
    pub fn comparator(&self) -> &MeshComparator {
        &self.comparator
    }

    /// ID of `entry`, interning it under `base` plus the hex face mask if new.
    pub fn get_id(&self, entry: &ModelEntry, base: &str) -> String {
        let mut palette = self.palette.lock();
        if let Some(id) = palette.models.get(entry) {
            return id.clone();
        }
        let id = palette.make_unique(&format!("{base}.{:x}", entry.faces));
        palette.models.insert(entry.clone(), id.clone());
        palette.by_id.insert(id.clone(), entry.clone());
        log::trace!("Interned {id}");
        id
    }

    /// ID of `entry` named after its block state.
    pub fn add_block(&self, entry: &ModelEntry) -> String {
        self.get_id(entry, &entry.base_name())
    }

    /// Return `name`, or the first free name after it in the collision chain.
    pub fn make_name_unique(&self, name: &str) -> String {
        self.palette.lock().make_unique(name)
    }

    /// Intern a generated mesh. An identical mesh already in the palette
    /// is reused.
    pub fn add_extra_model(&self, name: &str, mesh: &Mesh) -> String {
        let key = mesh.key();
        let mut palette = self.palette.lock();
        if let Some(existing) = palette.extra_ids.get(&key) {
            return existing.clone();
        }
        let id = palette.make_unique(name);
        palette.extra.insert(id.clone(), mesh.clone());
        palette.extra_ids.insert(key, id.clone());
        log::debug!("Added generated mesh {id}");
        id
    }

    /// Register a material unless one with this name exists.
    pub fn add_material(&self, name: &str, material: Material) {
        self.materials.lock().entry(name.to_string()).or_insert(material);
    }

    /// Register a texture unless one with this name exists.
    pub fn add_texture(&self, name: &str, texture: Arc<dyn ReplayTexture>) {
        self.textures.lock().entry(name.to_string()).or_insert(texture);
    }

    pub fn materials(&self) -> BTreeMap<String, Material> {
        self.materials.lock().clone()
    }

    pub fn textures(&self) -> BTreeMap<String, Arc<dyn ReplayTexture>> {
        self.textures.lock().clone()
    }

    /// Interned block appearances by ID.
    pub fn model_entries(&self) -> BTreeMap<String, ModelEntry> {
        self.palette.lock().by_id.clone()
    }

    pub fn extra_models(&self) -> BTreeMap<String, Mesh> {
        self.palette.lock().extra.clone()
    }

    pub fn extra_model(&self, id: &str) -> Option<Mesh> {
        self.palette.lock().extra.get(id).cloned()
    }

    /// Mesh ID to block identifier, for every interned block appearance.
    pub fn id_mapping(&self) -> BTreeMap<String, String> {
        self.palette
            .lock()
            .by_id
            .iter()
            .filter_map(|(id, entry)| entry.state.as_ref().map(|s| (id.clone(), s.block.to_string())))
            .collect()
    }

    pub fn model_count(&self) -> usize {
        let palette = self.palette.lock();
        palette.by_id.len() + palette.extra.len()
    }
}

impl std::fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportContext")
            .field("models", &self.model_count())
            .field("materials", &self.materials.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimpleModels;
    use proptest::prelude::*;
    use rayon::prelude::*;

    fn entry(raw_id: u32, faces: u8) -> ModelEntry {
        let state = BlockState::new("minecraft:stone", raw_id);
        ModelEntry::new(ModelHandle(u64::from(raw_id)), state).with_faces(FaceMask::from_bits(faces))
    }

    fn context() -> ExportContext {
        ExportContext::new(VcapSettings::default())
    }

    #[test]
    fn test_id_format() {
        let ctx = context();
        assert_eq!(ctx.add_block(&entry(26, 0b11_1111)), "minecraft_stone#1a.3f");
        assert_eq!(ctx.add_block(&entry(26, 0b11_1111)), "minecraft_stone#1a.3f");
        assert_eq!(ctx.model_count(), 1);
        assert_eq!(
            ctx.id_mapping().get("minecraft_stone#1a.3f").map(String::as_str),
            Some("minecraft:stone")
        );
    }

    #[test]
    fn test_next_name() {
        assert_eq!(next_name("fluid.0"), "fluid.1");
        assert_eq!(next_name("fluid.9"), "fluid.10");
        assert_eq!(next_name("stone#1.3f"), "stone#1.3f.1");
        assert_eq!(next_name("plain"), "plain.1");
        assert_eq!(next_name("trailing."), "trailing..1");
    }

    #[test]
    fn test_collision_renamed() {
        let ctx = context();
        let a = entry(1, 1);
        // Same base name, different model
        let mut b = entry(1, 1);
        b.model = ModelHandle(99);

        let id_a = ctx.get_id(&a, "block");
        let id_b = ctx.get_id(&b, "block");
        assert_eq!(id_a, "block.1");
        assert_eq!(id_b, "block.2");
        assert_eq!(ctx.get_id(&b, "ignored"), "block.2");
    }

    #[test]
    fn test_extra_models_dedup() {
        let ctx = context();
        let mut mesh = Mesh::default();
        mesh.positions.push([0.0, 0.5, 0.0]);

        let first = ctx.add_extra_model(FLUID_MESH_NAME, &mesh);
        let again = ctx.add_extra_model(FLUID_MESH_NAME, &mesh);
        assert_eq!(first, "fluid.0");
        assert_eq!(again, "fluid.0");

        let mut other = mesh.clone();
        other.positions[0][1] = 0.9;
        assert_eq!(ctx.add_extra_model(FLUID_MESH_NAME, &other), "fluid.1");
        assert_eq!(ctx.extra_models().len(), 2);
        assert_eq!(ctx.make_name_unique(EMPTY_MESH), "empty.1");
    }

    #[test]
    fn test_extra_models_keep_distinct_faces() {
        use crate::capture::FluidDomain;
        use crate::schema::{BlockPos, CaptureBounds, ChunkPos};
        use crate::world::{FluidState, MemoryWorld};

        let world = MemoryWorld::new(0..1);
        world.fill(BlockPos::new(0, 0, 0), BlockPos::new(3, 0, 3), &BlockState::new("minecraft:stone", 1));
        let water = BlockState::new("minecraft:water", 5)
            .with_opaque(false)
            .with_fluid(FluidState::new("minecraft:water", 8));
        let pos = BlockPos::new(0, 1, 0);
        world.set_block(pos, water);

        let models = SimpleModels::new();
        let settings =
            VcapSettings::new(CaptureBounds::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1)).with_sections(0..1));
        let open = FluidDomain::capture(&world, &models, &settings, pos).unwrap();
        // Walling off the east side culls one face but keeps every corner
        world.set_block(BlockPos::new(1, 1, 0), BlockState::new("minecraft:stone", 1));
        let walled = FluidDomain::capture(&world, &models, &settings, pos).unwrap();
        assert_eq!(open.mesh().positions.len(), walled.mesh().positions.len());
        assert_eq!((open.mesh().faces.len(), walled.mesh().faces.len()), (5, 4));

        let ctx = context();
        assert_eq!(ctx.add_extra_model(FLUID_MESH_NAME, open.mesh()), "fluid.0");
        assert_eq!(ctx.add_extra_model(FLUID_MESH_NAME, walled.mesh()), "fluid.1");
        assert_eq!(ctx.add_extra_model(FLUID_MESH_NAME, open.mesh()), "fluid.0");
        assert_eq!(ctx.extra_model("fluid.1").as_ref(), Some(walled.mesh()));
    }

    #[test]
    fn test_entry_mesh_visible_faces() {
        let models = SimpleModels::new();
        let mesh = entry(1, 0b00_0011).build_mesh(&models);
        assert_eq!(mesh.faces.len(), 2);
        assert!(entry(1, 0).build_mesh(&models).is_empty());
    }

    #[test]
    fn test_concurrent_interning() {
        let ctx = context();
        let entries: Vec<ModelEntry> = (0..64u32)
            .flat_map(|id| (0..64u8).map(move |faces| entry(id % 8, faces)))
            .collect();

        let ids: Vec<String> = entries.par_iter().map(|e| ctx.add_block(e)).collect();
        for (e, id) in entries.iter().zip(&ids) {
            assert_eq!(&ctx.add_block(e), id);
        }
        // 8 states x 64 masks
        assert_eq!(ctx.model_count(), 8 * 64);
    }

    proptest! {
        #[test]
        fn test_fingerprint_stability(
            a in (0u32..16, 0u8..64),
            b in (0u32..16, 0u8..64),
        ) {
            let ctx = context();
            let ea = entry(a.0, a.1);
            let eb = entry(b.0, b.1);
            let id_a = ctx.add_block(&ea);
            let id_b = ctx.add_block(&eb);
            prop_assert_eq!(&ctx.add_block(&ea), &id_a);
            prop_assert_eq!(id_a == id_b, ea == eb);
        }
    }
}
