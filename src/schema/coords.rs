//! Block, section and chunk coordinates.
//!
//! Sections are 16x16x16 voxel cubes. Within a section, voxels are addressed
//! by a flat index in `(y * 16 + z) * 16 + x` order (x fastest, then z, then y).

use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Edge length of a section in blocks.
pub const SECTION_SIZE: i32 = 16;

/// Number of voxels in one section.
pub const SECTION_VOLUME: usize = 16 * 16 * 16;

/// Absolute block position.
///
/// Ordering follows voxel order: `y`, then `z`, then `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The neighboring position in `direction`.
    #[inline]
    pub fn offset(self, direction: Direction) -> Self {
        let [dx, dy, dz] = direction.vector();
        self.add(dx, dy, dz)
    }

    #[inline]
    pub fn add(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Component-wise `self - other`.
    #[inline]
    pub fn subtract(self, other: BlockPos) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn manhattan_distance(self, other: BlockPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y) + self.z.abs_diff(other.z)
    }

    /// Section containing this block.
    #[inline]
    pub fn section(self) -> SectionPos {
        SectionPos::new(
            self.x.div_euclid(SECTION_SIZE),
            self.y.div_euclid(SECTION_SIZE),
            self.z.div_euclid(SECTION_SIZE),
        )
    }

    #[inline]
    pub fn chunk(self) -> ChunkPos {
        ChunkPos::new(self.x.div_euclid(SECTION_SIZE), self.z.div_euclid(SECTION_SIZE))
    }

    /// Flat index of this block within its section.
    #[inline]
    pub fn section_index(self) -> usize {
        let x = self.x.rem_euclid(SECTION_SIZE) as usize;
        let y = self.y.rem_euclid(SECTION_SIZE) as usize;
        let z = self.z.rem_euclid(SECTION_SIZE) as usize;
        (y * 16 + z) * 16 + x
    }

    pub fn to_array(self) -> [i32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn as_vec3(self) -> [f32; 3] {
        [self.x as f32, self.y as f32, self.z as f32]
    }
}

impl Ord for BlockPos {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.z, self.x).cmp(&(other.y, other.z, other.x))
    }
}

impl PartialOrd for BlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

impl From<[i32; 3]> for BlockPos {
    fn from([x, y, z]: [i32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

/// Section coordinates (block coordinates divided by 16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectionPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl SectionPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Minimum block of this section.
    pub fn origin(self) -> BlockPos {
        BlockPos::new(
            self.x * SECTION_SIZE,
            self.y * SECTION_SIZE,
            self.z * SECTION_SIZE,
        )
    }

    /// Absolute position of the voxel at `index` (see [`BlockPos::section_index`]).
    #[inline]
    pub fn block_at(self, index: usize) -> BlockPos {
        let x = (index % 16) as i32;
        let z = ((index / 16) % 16) as i32;
        let y = (index / 256) as i32;
        self.origin().add(x, y, z)
    }

    pub fn chunk(self) -> ChunkPos {
        ChunkPos::new(self.x, self.z)
    }
}

impl fmt::Display for SectionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

/// Column of sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

/// The six cardinal directions in face-mask bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl Direction {
    /// All directions, in face-mask bit order.
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Unit offset of this direction (north is -z, east is +x).
    pub const fn vector(self) -> [i32; 3] {
        match self {
            Direction::North => [0, 0, -1],
            Direction::South => [0, 0, 1],
            Direction::East => [1, 0, 0],
            Direction::West => [-1, 0, 0],
            Direction::Up => [0, 1, 0],
            Direction::Down => [0, -1, 0],
        }
    }

    /// Bit of this direction in a [`FaceMask`].
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    pub const fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Six-bit face visibility mask, one bit per [`Direction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FaceMask(u8);

impl FaceMask {
    pub const NONE: FaceMask = FaceMask(0);
    pub const ALL: FaceMask = FaceMask(0b11_1111);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b11_1111)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn set(&mut self, direction: Direction, visible: bool) {
        if visible {
            self.0 |= direction.bit();
        } else {
            self.0 &= !direction.bit();
        }
    }

    #[inline]
    pub fn contains(self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    /// Visible directions, in bit order.
    pub fn iter(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.contains(*d))
    }
}

impl fmt::LowerHex for FaceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

fn default_section_range() -> Range<i32> {
    -4..20
}

/// Region of the world to capture.
///
/// Horizontal extent is the half-open chunk range `[min_chunk, max_chunk)`;
/// vertical extent is the half-open section range `sections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureBounds {
    pub min_chunk: ChunkPos,
    pub max_chunk: ChunkPos,
    #[serde(default = "default_section_range")]
    pub sections: Range<i32>,
}

impl CaptureBounds {
    pub fn new(min_chunk: ChunkPos, max_chunk: ChunkPos) -> Self {
        Self {
            min_chunk,
            max_chunk,
            sections: default_section_range(),
        }
    }

    pub fn with_sections(mut self, sections: Range<i32>) -> Self {
        self.sections = sections;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.min_chunk.x >= self.max_chunk.x
            || self.min_chunk.z >= self.max_chunk.z
            || self.sections.is_empty()
    }

    pub fn contains_section(&self, section: SectionPos) -> bool {
        (self.min_chunk.x..self.max_chunk.x).contains(&section.x)
            && (self.min_chunk.z..self.max_chunk.z).contains(&section.z)
            && self.sections.contains(&section.y)
    }

    /// Whether a block lies inside the captured region.
    #[inline]
    pub fn contains(&self, pos: BlockPos) -> bool {
        self.contains_section(pos.section())
    }

    /// Chunks in bounds, x-major.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        (self.min_chunk.x..self.max_chunk.x)
            .flat_map(move |x| (self.min_chunk.z..self.max_chunk.z).map(move |z| ChunkPos::new(x, z)))
    }

    pub fn chunk_count(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let width = (self.max_chunk.x - self.min_chunk.x) as usize;
        let depth = (self.max_chunk.z - self.min_chunk.z) as usize;
        width * depth
    }

    /// Minimum block of the region.
    pub fn min_block(&self) -> BlockPos {
        SectionPos::new(self.min_chunk.x, self.sections.start, self.min_chunk.z).origin()
    }
}

impl Default for CaptureBounds {
    fn default() -> Self {
        Self::new(ChunkPos::new(0, 0), ChunkPos::new(1, 1))
    }
}
