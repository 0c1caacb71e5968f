//! Frame model - intracoded snapshots, predicted deltas and the chain that
//! links them.
//!
//! Frames live in an append-only arena ([`FrameChain`]). A predicted frame
//! refers to its predecessor by index; lookups of positions it did not
//! record walk back along the chain until a frame answers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use super::CaptureError;
use super::fluid::{FluidDomain, FluidRegistry};
use super::identity::{EMPTY_MESH, FLUID_MESH_NAME};
use super::section::{BlockEncoder, CaptureProgress, EncodedSection, capture_sections};
use crate::schema::{BlockPos, Direction, SectionPos};
use crate::world::{BlockState, Rgb};

/// Frame type tag of intracoded frames.
pub const INTRACODED_TYPE: i8 = 0;

/// Frame type tag of predicted frames.
pub const PREDICTED_TYPE: i8 = 1;

/// A full snapshot of every loaded section in bounds.
#[derive(Debug)]
pub struct IFrame {
    pub time: f64,
    sections: Vec<EncodedSection>,
    fluids: HashMap<BlockPos, Arc<FluidDomain>>,
    section_cache: RwLock<HashMap<SectionPos, Option<usize>>>,
}

impl IFrame {
    pub fn new(
        time: f64,
        sections: Vec<EncodedSection>,
        fluids: HashMap<BlockPos, Arc<FluidDomain>>,
    ) -> Self {
        Self {
            time,
            sections,
            fluids,
            section_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Encode every loaded section in the context's bounds.
    ///
    /// May take several seconds on large regions. Pass a
    /// [`WorldSnapshot`](crate::world::WorldSnapshot) as the encoder's world
    /// to run this off the thread that owns the live world.
    pub fn capture(
        encoder: &BlockEncoder<'_>,
        time: f64,
        progress: Option<&(dyn Fn(CaptureProgress) + Sync)>,
    ) -> Self {
        let settings = encoder.context.settings();
        let registry = settings.fluid_mode.export_static().then(FluidRegistry::new);
        let sections = capture_sections(encoder, registry.as_ref(), progress);
        let fluids = registry.map(FluidRegistry::into_map).unwrap_or_default();
        log::info!(
            "Captured {} sections and {} fluid blocks at {time}s",
            sections.len(),
            fluids.len()
        );
        Self::new(time, sections, fluids)
    }

    pub fn sections(&self) -> &[EncodedSection] {
        &self.sections
    }

    fn section_index(&self, pos: SectionPos) -> Option<usize> {
        if let Some(cached) = self.section_cache.read().get(&pos) {
            return *cached;
        }
        let index = self.sections.iter().position(|s| s.pos == pos);
        self.section_cache.write().insert(pos, index);
        index
    }

    /// Mesh ID at `pos`; positions without a captured section are out of bounds.
    pub fn model_at(&self, pos: BlockPos) -> Result<&str, CaptureError> {
        self.section_index(pos.section())
            .and_then(|i| self.sections[i].model_at(pos.section_index()))
            .ok_or(CaptureError::OutOfBounds { pos })
    }

    pub fn fluid_at(&self, pos: BlockPos) -> Option<&Arc<FluidDomain>> {
        self.fluids.get(&pos)
    }
}

/// One recorded block of a predicted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockUpdate {
    pub mesh: String,
    pub state: BlockState,
    /// Tint sampled when the frame was captured.
    pub color: Rgb,
}

/// Blocks that changed since the previous frame.
#[derive(Debug, Clone, Default)]
pub struct PFrame {
    pub time: f64,
    previous: Option<usize>,
    updates: BTreeMap<BlockPos, BlockUpdate>,
    /// Fluid bodies re-captured in this frame. `None` marks a position that
    /// left the body it belonged to in the previous frame.
    fluids: HashMap<BlockPos, Option<Arc<FluidDomain>>>,
}

impl PFrame {
    pub fn new(time: f64, previous: Option<usize>) -> Self {
        Self {
            time,
            previous,
            ..Default::default()
        }
    }

    pub fn previous(&self) -> Option<usize> {
        self.previous
    }

    pub fn updates(&self) -> &BTreeMap<BlockPos, BlockUpdate> {
        &self.updates
    }

    pub fn record(&mut self, pos: BlockPos, update: BlockUpdate) {
        self.updates.insert(pos, update);
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

#[derive(Debug)]
pub enum Frame {
    Intracoded(IFrame),
    Predicted(PFrame),
}

impl Frame {
    pub fn time(&self) -> f64 {
        match self {
            Frame::Intracoded(f) => f.time,
            Frame::Predicted(f) => f.time,
        }
    }

    pub fn frame_type(&self) -> i8 {
        match self {
            Frame::Intracoded(_) => INTRACODED_TYPE,
            Frame::Predicted(_) => PREDICTED_TYPE,
        }
    }
}

impl From<IFrame> for Frame {
    fn from(frame: IFrame) -> Self {
        Frame::Intracoded(frame)
    }
}

impl From<PFrame> for Frame {
    fn from(frame: PFrame) -> Self {
        Frame::Predicted(frame)
    }
}

/// Ordered frames of one capture.
#[derive(Debug, Default)]
pub struct FrameChain {
    frames: Vec<Frame>,
}

impl FrameChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    fn last_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }

    /// Append a frame. A predicted frame is linked to the current last frame.
    pub fn push(&mut self, frame: impl Into<Frame>) -> usize {
        let mut frame = frame.into();
        if let Frame::Predicted(p) = &mut frame {
            p.previous = self.last_index();
        }
        self.frames.push(frame);
        self.frames.len() - 1
    }

    /// Insert a frame at `index`, shifting later frames back.
    ///
    /// Predecessor links are kept pointing at the same frames, the frame
    /// after the insertion point is relinked to the new frame, and a
    /// predicted frame being inserted is linked to the frame before it.
    pub fn insert(&mut self, index: usize, frame: impl Into<Frame>) -> Result<(), CaptureError> {
        if index > self.frames.len() {
            return Err(CaptureError::UnknownFrame(index));
        }
        for later in &mut self.frames[index..] {
            if let Frame::Predicted(p) = later {
                p.previous = p.previous.map(|prev| if prev >= index { prev + 1 } else { prev });
            }
        }
        if let Some(Frame::Predicted(next)) = self.frames.get_mut(index) {
            next.previous = Some(index);
        }

        let mut frame = frame.into();
        if let Frame::Predicted(p) = &mut frame {
            p.previous = index.checked_sub(1);
        }
        self.frames.insert(index, frame);
        Ok(())
    }

    /// Mesh ID at `pos` as of frame `index`.
    pub fn model_at(&self, index: usize, pos: BlockPos) -> Result<&str, CaptureError> {
        let mut current = Some(index);
        while let Some(i) = current {
            match self.frames.get(i).ok_or(CaptureError::UnknownFrame(i))? {
                Frame::Intracoded(frame) => return frame.model_at(pos),
                Frame::Predicted(frame) => {
                    if let Some(update) = frame.updates.get(&pos) {
                        return Ok(&update.mesh);
                    }
                    current = frame.previous;
                }
            }
        }
        Err(CaptureError::OutOfBounds { pos })
    }

    /// Fluid domain covering `pos` as of frame `index`.
    pub fn fluid_at(&self, index: usize, pos: BlockPos) -> Option<Arc<FluidDomain>> {
        let mut current = Some(index);
        while let Some(i) = current {
            match self.frames.get(i)? {
                Frame::Intracoded(frame) => return frame.fluid_at(pos).cloned(),
                Frame::Predicted(frame) => {
                    if let Some(domain) = frame.fluids.get(&pos) {
                        return domain.clone();
                    }
                    current = frame.previous;
                }
            }
        }
        None
    }

    /// Capture the blocks in `dirty` relative to the last frame.
    ///
    /// Each dirty position inside the bounds is recorded. Its six neighbors
    /// are re-encoded and recorded when they look different than in the
    /// previous frame. With dynamic fluid export, fluid bodies touching the
    /// changed blocks are re-captured and recorded unless geometrically
    /// unchanged. The frame is returned unlinked; [`FrameChain::push`] links it.
    pub fn capture_predicted(
        &self,
        encoder: &BlockEncoder<'_>,
        dirty: &HashSet<BlockPos>,
        time: f64,
    ) -> Result<PFrame, CaptureError> {
        let mut capture = PredictedCapture {
            chain: self,
            previous: self.last_index(),
            encoder,
            frame: PFrame::new(time, self.last_index()),
            handled: HashSet::new(),
        };
        // Sorted for a deterministic palette
        let dirty: BTreeSet<BlockPos> = dirty.iter().copied().collect();
        capture.run(&dirty)?;
        log::debug!("Captured {} block updates at {time}s", capture.frame.updates.len());
        Ok(capture.frame)
    }
}

struct PredictedCapture<'a, 'w> {
    chain: &'a FrameChain,
    previous: Option<usize>,
    encoder: &'a BlockEncoder<'w>,
    frame: PFrame,
    handled: HashSet<BlockPos>,
}

impl PredictedCapture<'_, '_> {
    fn previous_model(&self, pos: BlockPos) -> Result<&str, CaptureError> {
        match self.previous {
            Some(index) => self.chain.model_at(index, pos),
            None => Err(CaptureError::OutOfBounds { pos }),
        }
    }

    fn previous_fluid(&self, pos: BlockPos) -> Option<Arc<FluidDomain>> {
        self.chain.fluid_at(self.previous?, pos)
    }

    fn put(&mut self, pos: BlockPos, mesh: String) {
        let update = BlockUpdate {
            mesh,
            state: self.encoder.world.block_state(pos),
            color: self.encoder.color(pos),
        };
        self.frame.updates.insert(pos, update);
    }

    fn current_model(&self, pos: BlockPos) -> Option<&str> {
        match self.frame.updates.get(&pos) {
            Some(update) => Some(&update.mesh),
            None => self.previous_model(pos).ok(),
        }
    }

    fn run(&mut self, dirty: &BTreeSet<BlockPos>) -> Result<(), CaptureError> {
        let settings = self.encoder.context.settings();
        let dynamic = settings.fluid_mode.export_dynamic();
        let world = self.encoder.world;
        let mut fluid_positions = BTreeSet::new();

        for &pos in dirty {
            if !settings.is_in_export(pos) {
                continue;
            }
            let holds_fluid = world.block_state(pos).has_fluid();
            if dynamic && (holds_fluid || self.previous_fluid(pos).is_some()) {
                fluid_positions.insert(pos);
            }
            if holds_fluid && (dynamic || self.previous_fluid(pos).is_some()) {
                // Covered by a fluid body
            } else {
                self.put(pos, self.encoder.encode_block(pos));
            }

            for direction in Direction::ALL {
                let adjacent = pos.offset(direction);
                if !settings.is_in_export(adjacent) || self.frame.updates.contains_key(&adjacent) {
                    continue;
                }
                let previous_fluid = self.previous_fluid(adjacent);
                if dynamic && previous_fluid.is_some() {
                    fluid_positions.insert(adjacent);
                }
                if world.block_state(adjacent).has_fluid() && (dynamic || previous_fluid.is_some()) {
                    continue;
                }

                let old = match self.previous_model(adjacent) {
                    Ok(old) => old.to_string(),
                    Err(CaptureError::OutOfBounds { .. }) => continue,
                    Err(other) => return Err(other),
                };
                let new = self.encoder.encode_block(adjacent);
                if old != new {
                    self.put(adjacent, new);
                }
            }
        }

        for pos in fluid_positions {
            self.capture_fluid(pos);
        }
        Ok(())
    }

    /// Re-record the block at a former fluid root unless this frame
    /// already decided what it looks like.
    fn reset_root(&mut self, root: BlockPos) {
        if self.handled.contains(&root) || self.frame.updates.contains_key(&root) {
            return;
        }
        let mesh = self.encoder.encode_block(root);
        self.put(root, mesh);
    }

    fn capture_fluid(&mut self, pos: BlockPos) {
        if self.handled.contains(&pos) {
            return;
        }
        let last = self.previous_fluid(pos);
        if !self.encoder.world.block_state(pos).has_fluid() {
            if let Some(last) = last {
                self.frame.fluids.insert(pos, None);
                self.reset_root(last.root());
            }
            return;
        }
        let Some(domain) = self.encoder.fluid_domain(pos) else {
            return;
        };

        if let Some(last) = &last {
            if domain.matches(last, self.encoder.context.comparator()) {
                self.handled.extend(last.positions().iter().copied());
                return;
            }
            if domain.root() != last.root() {
                self.reset_root(last.root());
            }
        }

        let domain = Arc::new(domain);
        for member in domain.positions() {
            self.frame.fluids.insert(*member, Some(Arc::clone(&domain)));
            self.handled.insert(*member);
        }
        if let Some(last) = &last {
            // Split-off members are claimed by their own body if it is
            // captured later in this frame
            for member in last.positions().difference(domain.positions()) {
                self.frame.fluids.entry(*member).or_insert(None);
            }
        }

        let mesh = self.encoder.context.add_extra_model(FLUID_MESH_NAME, domain.mesh());
        self.put(domain.root(), mesh);
        for member in domain.positions() {
            if *member != domain.root() && self.current_model(*member) != Some(EMPTY_MESH) {
                self.put(*member, EMPTY_MESH.to_string());
            }
        }
    }
}
