//! Archive reader with caller-controlled partial-failure handling.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufReader, Read, Seek};

use image::RgbaImage;
use zip::ZipArchive;

use super::format::{DecodedFrame, META_ENTRY, VcapMeta, WORLD_ENTRY, WorldTag};
use super::writer::ArchiveError;
use crate::capture::Mesh;
use crate::schema::Material;

/// Which part of an archive failed to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    General,
    Entity,
    Material,
    Texture,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::General => "general",
            ParseStage::Entity => "entity",
            ParseStage::Material => "material",
            ParseStage::Texture => "texture",
        };
        f.write_str(name)
    }
}

/// A failure while loading one item of an archive.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load {stage} item {culprit}: {source}")]
pub struct ParseError {
    pub stage: ParseStage,
    /// Entry that failed.
    pub culprit: String,
    #[source]
    pub source: Box<ArchiveError>,
}

/// What to do after a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Leave the item out and keep loading.
    Skip,
    /// Stop and return the error.
    Abort,
}

/// An undecoded texture file.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl TextureData {
    /// Decode an image texture.
    pub fn image(&self) -> Result<RgbaImage, ArchiveError> {
        let image = image::load_from_memory(&self.bytes).map_err(super::TextureError::from)?;
        Ok(image.to_rgba8())
    }
}

/// Contents of a loaded archive.
#[derive(Debug, Default)]
pub struct LoadedArchive {
    pub meta: Option<VcapMeta>,
    pub frames: Vec<DecodedFrame>,
    pub meshes: BTreeMap<String, Mesh>,
    pub materials: BTreeMap<String, Material>,
    pub textures: BTreeMap<String, TextureData>,
    /// Raw entity streams.
    pub entities: BTreeMap<String, String>,
}

/// Reads archives written by [`write_archive`](super::write_archive).
pub struct ArchiveReader<R: Read + Seek> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn new(reader: R) -> Result<Self, ArchiveError> {
        Ok(Self {
            zip: ZipArchive::new(reader)?,
        })
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut file = self.zip.by_name(name)?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn read_meta(&mut self) -> Result<VcapMeta, ArchiveError> {
        Ok(serde_json::from_slice(&self.read_entry(META_ENTRY)?)?)
    }

    fn read_world(&mut self) -> Result<Vec<DecodedFrame>, ArchiveError> {
        let world: WorldTag = fastnbt::from_bytes(&self.read_entry(WORLD_ENTRY)?)?;
        let frames = world
            .frames
            .iter()
            .enumerate()
            .map(|(i, frame)| frame.decode(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(frames)
    }

    fn read_mesh(&mut self, name: &str) -> Result<Mesh, ArchiveError> {
        let file = self.zip.by_name(name)?;
        Ok(Mesh::parse_obj(BufReader::new(file))?)
    }

    fn read_material(&mut self, name: &str) -> Result<Material, ArchiveError> {
        let file = self.zip.by_name(name)?;
        Ok(Material::load(file)?)
    }

    fn read_entity(&mut self, name: &str) -> Result<String, ArchiveError> {
        let bytes = self.read_entry(name)?;
        String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    /// Load everything, consulting `handler` on each failure.
    ///
    /// A skipped item is left out of the result. An aborted load returns
    /// the error that caused it.
    pub fn load(
        mut self,
        mut handler: impl FnMut(&ParseError) -> Recovery,
    ) -> Result<LoadedArchive, ParseError> {
        let mut loaded = LoadedArchive::default();
        let mut check = |stage: ParseStage, culprit: &str, error: ArchiveError| {
            let error = ParseError {
                stage,
                culprit: culprit.to_string(),
                source: Box::new(error),
            };
            match handler(&error) {
                Recovery::Skip => {
                    log::warn!("Skipping {error}");
                    Ok(())
                }
                Recovery::Abort => Err(error),
            }
        };

        match self.read_meta() {
            Ok(meta) => loaded.meta = Some(meta),
            Err(e) => check(ParseStage::General, META_ENTRY, e)?,
        }
        match self.read_world() {
            Ok(frames) => loaded.frames = frames,
            Err(e) => check(ParseStage::General, WORLD_ENTRY, e)?,
        }

        let names: Vec<String> = self.zip.file_names().map(String::from).collect();
        for name in names {
            if let Some(id) = entry_stem(&name, "mesh/", ".obj") {
                match self.read_mesh(&name) {
                    Ok(mesh) => {
                        loaded.meshes.insert(id.to_string(), mesh);
                    }
                    Err(e) => check(ParseStage::General, &name, e)?,
                }
            } else if let Some(id) = entry_stem(&name, "mat/", ".json") {
                match self.read_material(&name) {
                    Ok(material) => {
                        loaded.materials.insert(id.to_string(), material);
                    }
                    Err(e) => check(ParseStage::Material, &name, e)?,
                }
            } else if let Some(path) = name.strip_prefix("tex/") {
                let Some((id, extension)) = path.rsplit_once('.') else {
                    continue;
                };
                match self.read_entry(&name) {
                    Ok(bytes) => {
                        let data = TextureData {
                            extension: extension.to_string(),
                            bytes,
                        };
                        loaded.textures.insert(id.to_string(), data);
                    }
                    Err(e) => check(ParseStage::Texture, &name, e)?,
                }
            } else if let Some(id) = entry_stem(&name, "entities/", ".xml") {
                match self.read_entity(&name) {
                    Ok(text) => {
                        loaded.entities.insert(id.to_string(), text);
                    }
                    Err(e) => check(ParseStage::Entity, &name, e)?,
                }
            }
        }

        log::info!(
            "Loaded {} frames, {} meshes, {} materials and {} textures",
            loaded.frames.len(),
            loaded.meshes.len(),
            loaded.materials.len(),
            loaded.textures.len()
        );
        Ok(loaded)
    }
}

fn entry_stem<'a>(name: &'a str, dir: &str, extension: &str) -> Option<&'a str> {
    name.strip_prefix(dir)?.strip_suffix(extension)
}
