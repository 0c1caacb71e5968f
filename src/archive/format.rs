//! Archive layout and the on-disk structures of `meta.json` and `world.dat`.
//!
//! ```text
//! meta.json           format version, encoder, offset, face layers, block types
//! world.dat           NBT { frames: [...] }
//! mesh/<id>.obj       one per geometry ID, always including mesh/empty.obj
//! mat/<name>.json     one per material
//! tex/<name>.<ext>    one per texture, .png unless the texture says otherwise
//! ```

use std::collections::BTreeMap;

use fastnbt::{ByteArray, IntArray};
use serde::{Deserialize, Serialize};

use crate::capture::{EncodedSection, Frame, face_layer_name};
use crate::schema::{BlockPos, SECTION_VOLUME, SectionPos};
use crate::world::Rgb;

pub const FORMAT_VERSION: &str = "0.5.0";

pub const ENCODER: &str = concat!("vcap ", env!("CARGO_PKG_VERSION"));

pub const META_ENTRY: &str = "meta.json";
pub const WORLD_ENTRY: &str = "world.dat";

pub fn mesh_path(id: &str) -> String {
    format!("mesh/{id}.obj")
}

pub fn material_path(name: &str) -> String {
    format!("mat/{name}.json")
}

pub fn texture_path(name: &str, extension: &str) -> String {
    format!("tex/{name}.{extension}")
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcapMeta {
    pub version: String,
    pub encoder: String,
    #[serde(default)]
    pub offset: [i32; 3],
    #[serde(default)]
    pub face_layers: Vec<String>,
    /// Mesh ID to block identifier.
    #[serde(default)]
    pub block_types: BTreeMap<String, String>,
}

impl VcapMeta {
    pub fn new(offset: [i32; 3], layer_count: u32) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            encoder: ENCODER.to_string(),
            offset,
            face_layers: (0..layer_count).map(face_layer_name).collect(),
            block_types: BTreeMap::new(),
        }
    }
}

/// Root of `world.dat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldTag {
    pub frames: Vec<FrameTag>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameTag {
    #[serde(rename = "type")]
    pub frame_type: i8,
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionTag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<BlockTag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub palette: Option<Vec<String>>,
}

/// One intracoded section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTag {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub palette: Vec<String>,
    pub blocks: IntArray,
    /// Flat `r, g, b` triples.
    #[serde(rename = "colorPalette")]
    pub color_palette: ByteArray,
    /// Per-voxel byte offset into `colorPalette`.
    pub colors: ByteArray,
}

/// One recorded block of a predicted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockTag {
    /// Index into the frame palette.
    pub state: i32,
    pub pos: Vec<i32>,
    pub color: Vec<i8>,
}

/// Structural problems in decoded world data.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Section {pos} has {len} voxels, expected {SECTION_VOLUME}")]
    SectionSize { pos: SectionPos, len: usize },
    #[error("Palette index {index} out of range in {context}")]
    PaletteIndex { index: i64, context: String },
    #[error("Frame {index} has unknown type {frame_type}")]
    FrameType { index: usize, frame_type: i8 },
    #[error("Frame {index} is missing its {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("Malformed block entry in frame {index}")]
    MalformedBlock { index: usize },
}

fn byte_array(values: impl IntoIterator<Item = u8>) -> ByteArray {
    ByteArray::new(values.into_iter().map(|b| b as i8).collect())
}

impl From<&EncodedSection> for SectionTag {
    fn from(section: &EncodedSection) -> Self {
        Self {
            x: section.pos.x,
            y: section.pos.y,
            z: section.pos.z,
            palette: section.palette.clone(),
            blocks: IntArray::new(section.blocks.iter().map(|i| *i as i32).collect()),
            color_palette: byte_array(section.color_palette.iter().flatten().copied()),
            colors: byte_array(section.colors.iter().map(|i| i * 3)),
        }
    }
}

impl SectionTag {
    pub fn pos(&self) -> SectionPos {
        SectionPos::new(self.x, self.y, self.z)
    }

    /// Decode and validate against the section's own palettes.
    pub fn to_section(&self) -> Result<EncodedSection, FormatError> {
        let pos = self.pos();
        if self.blocks.len() != SECTION_VOLUME || self.colors.len() != SECTION_VOLUME {
            return Err(FormatError::SectionSize {
                pos,
                len: self.blocks.len().min(self.colors.len()),
            });
        }

        let blocks = self
            .blocks
            .iter()
            .map(|i| match usize::try_from(*i) {
                Ok(index) if index < self.palette.len() => Ok(index as u32),
                _ => Err(FormatError::PaletteIndex {
                    index: i64::from(*i),
                    context: format!("section {pos}"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let color_palette: Vec<Rgb> = self
            .color_palette
            .chunks_exact(3)
            .map(|c| [c[0] as u8, c[1] as u8, c[2] as u8])
            .collect();
        let colors = self
            .colors
            .iter()
            .map(|offset| {
                let index = (*offset as u8) / 3;
                if usize::from(index) < color_palette.len() {
                    Ok(index)
                } else {
                    Err(FormatError::PaletteIndex {
                        index: i64::from(index),
                        context: format!("colors of section {pos}"),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncodedSection {
            pos,
            palette: self.palette.clone(),
            blocks,
            color_palette,
            colors,
        })
    }
}

/// A recorded block read back from a predicted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    pub pos: BlockPos,
    pub mesh: String,
    pub color: Rgb,
}

/// A frame read back from `world.dat`.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Intracoded { time: f64, sections: Vec<EncodedSection> },
    Predicted { time: f64, blocks: Vec<DecodedBlock> },
}

impl DecodedFrame {
    pub fn time(&self) -> f64 {
        match self {
            DecodedFrame::Intracoded { time, .. } | DecodedFrame::Predicted { time, .. } => *time,
        }
    }
}

impl FrameTag {
    pub fn from_frame(frame: &Frame) -> Self {
        match frame {
            Frame::Intracoded(iframe) => Self {
                frame_type: frame.frame_type(),
                time: iframe.time,
                sections: Some(iframe.sections().iter().map(SectionTag::from).collect()),
                blocks: None,
                palette: None,
            },
            Frame::Predicted(pframe) => {
                let mut palette: Vec<String> = Vec::new();
                let mut lookup: BTreeMap<&str, i32> = BTreeMap::new();
                let blocks = pframe
                    .updates()
                    .iter()
                    .map(|(pos, update)| {
                        let state = *lookup.entry(update.mesh.as_str()).or_insert_with(|| {
                            palette.push(update.mesh.clone());
                            palette.len() as i32 - 1
                        });
                        BlockTag {
                            state,
                            pos: pos.to_array().to_vec(),
                            color: update.color.iter().map(|c| *c as i8).collect(),
                        }
                    })
                    .collect();
                Self {
                    frame_type: frame.frame_type(),
                    time: pframe.time,
                    sections: None,
                    blocks: Some(blocks),
                    palette: Some(palette),
                }
            }
        }
    }

    pub fn decode(&self, index: usize) -> Result<DecodedFrame, FormatError> {
        use crate::capture::{INTRACODED_TYPE, PREDICTED_TYPE};

        match self.frame_type {
            INTRACODED_TYPE => {
                let sections = self
                    .sections
                    .as_ref()
                    .ok_or(FormatError::MissingField { index, field: "sections" })?
                    .iter()
                    .map(SectionTag::to_section)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DecodedFrame::Intracoded {
                    time: self.time,
                    sections,
                })
            }
            PREDICTED_TYPE => {
                let palette = self
                    .palette
                    .as_ref()
                    .ok_or(FormatError::MissingField { index, field: "palette" })?;
                let blocks = self
                    .blocks
                    .as_ref()
                    .ok_or(FormatError::MissingField { index, field: "blocks" })?
                    .iter()
                    .map(|tag| {
                        let mesh = usize::try_from(tag.state)
                            .ok()
                            .and_then(|i| palette.get(i))
                            .ok_or_else(|| FormatError::PaletteIndex {
                                index: i64::from(tag.state),
                                context: format!("frame {index}"),
                            })?;
                        let (&[x, y, z], &[r, g, b]) = (tag.pos.as_slice(), tag.color.as_slice()) else {
                            return Err(FormatError::MalformedBlock { index });
                        };
                        Ok(DecodedBlock {
                            pos: BlockPos::new(x, y, z),
                            mesh: mesh.clone(),
                            color: [r as u8, g as u8, b as u8],
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DecodedFrame::Predicted {
                    time: self.time,
                    blocks,
                })
            }
            frame_type => Err(FormatError::FrameType { index, frame_type }),
        }
    }
}
