//! Connected fluid bodies meshed as a unit.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::flood_fill::flood_fill;
use super::identity::EMISSIVE_THRESHOLD;
use super::mesh::{Mesh, MeshBuilder, MeshComparator};
use crate::schema::{BlockPos, VcapSettings};
use crate::world::{BlockView, ModelProvider};

/// A connected body of one fluid within the capture region.
///
/// The root is the lowest member in `(y, z, x)` order. The mesh is in the
/// root's block-local space, so the palette entry at the root carries the
/// whole body and every other member maps to the empty mesh.
#[derive(Debug, Clone)]
pub struct FluidDomain {
    positions: BTreeSet<BlockPos>,
    root: BlockPos,
    fluid: Arc<str>,
    mesh: Mesh,
}

impl FluidDomain {
    /// Flood-fill and mesh the fluid body containing `seed`.
    ///
    /// The fill crosses loaded chunks holding the same fluid; only members
    /// inside the capture region are kept. Returns `None` when `seed` holds
    /// no fluid or the body has no member in the region.
    pub fn capture(
        world: &dyn BlockView,
        models: &dyn ModelProvider,
        settings: &VcapSettings,
        seed: BlockPos,
    ) -> Option<Self> {
        let fluid = world.block_state(seed).fluid?.fluid;

        let mut positions = BTreeSet::new();
        flood_fill(
            seed,
            &settings.flood_fill,
            |pos| world.is_chunk_loaded(pos.chunk()) && world.block_state(pos).fluid_is(&fluid),
            |pos| {
                if settings.is_in_export(pos) {
                    positions.insert(pos);
                }
            },
        );

        let root = *positions.first()?;
        let emissive = world.block_state(root).luminance >= EMISSIVE_THRESHOLD;
        let mut builder = MeshBuilder::new(true, emissive);
        for pos in &positions {
            let state = world.block_state(*pos);
            builder.set_offset(pos.subtract(root).as_vec3());
            models.render_fluid(world, *pos, &state, &mut builder);
        }

        log::debug!("Captured {} fluid body of {} blocks at {root}", fluid, positions.len());

        Some(Self {
            positions,
            root,
            fluid,
            mesh: builder.finish(),
        })
    }

    pub fn positions(&self) -> &BTreeSet<BlockPos> {
        &self.positions
    }

    pub fn root(&self) -> BlockPos {
        self.root
    }

    pub fn fluid(&self) -> &str {
        &self.fluid
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.positions.contains(&pos)
    }

    /// Whether `pos` is a member or face-adjacent to one.
    pub fn collides_with(&self, pos: BlockPos) -> bool {
        self.contains(pos) || self.positions.iter().any(|p| p.manhattan_distance(pos) <= 1)
    }

    /// Same members and geometrically equal meshes.
    pub fn matches(&self, other: &FluidDomain, comparator: &MeshComparator) -> bool {
        if self.positions != other.positions {
            return false;
        }
        let offset = other.root.subtract(self.root).as_vec3();
        comparator.matches(&self.mesh, &other.mesh, offset)
    }
}

/// Fluid domains of one frame, keyed by member position.
///
/// Safe to fill from many encoding threads. Each body is captured once;
/// if two threads race on the same body, the first insert wins.
#[derive(Debug, Default)]
pub struct FluidRegistry {
    domains: Mutex<HashMap<BlockPos, Arc<FluidDomain>>>,
}

impl FluidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pos: BlockPos) -> Option<Arc<FluidDomain>> {
        self.domains.lock().get(&pos).cloned()
    }

    /// Domain containing `pos`, capturing it with `capture` if unknown.
    ///
    /// `capture` runs without the registry lock held.
    pub fn domain_for(
        &self,
        pos: BlockPos,
        capture: impl FnOnce() -> Option<FluidDomain>,
    ) -> Option<Arc<FluidDomain>> {
        if let Some(domain) = self.get(pos) {
            return Some(domain);
        }
        let domain = Arc::new(capture()?);

        let mut domains = self.domains.lock();
        if let Some(existing) = domains.get(&pos) {
            return Some(Arc::clone(existing));
        }
        for member in domain.positions() {
            domains.entry(*member).or_insert_with(|| Arc::clone(&domain));
        }
        Some(domains.get(&pos).cloned().unwrap_or(domain))
    }

    pub fn into_map(self) -> HashMap<BlockPos, Arc<FluidDomain>> {
        self.domains.into_inner()
    }
}
