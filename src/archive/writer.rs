//! Archive writer.
//!
//! Entries are written in a fixed order: world data, meshes (with the
//! mandatory empty mesh), materials, textures and finally the metadata.
//! Nothing is written after a failure; the partially written container is
//! left to the caller to discard.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Seek, Write};
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::format::{
    FrameTag, META_ENTRY, VcapMeta, WORLD_ENTRY, WorldTag, material_path, mesh_path, texture_path,
};
use super::texture::{ExtractionFuture, ImageTexture, ReplayTexture, TextureError, resolve_textures};
use crate::capture::{EMPTY_MESH, ExportContext, Frame, FrameChain, Mesh, ObjError};
use crate::schema::{Material, WORLD_TEXTURE, WorldMaterial};
use crate::world::ModelProvider;

/// Archive read/write errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("NBT error: {0}")]
    Nbt(#[from] fastnbt::error::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Texture error: {0}")]
    Texture(#[from] TextureError),
    #[error("Mesh error: {0}")]
    Obj(#[from] ObjError),
    #[error("World data error: {0}")]
    Format(#[from] super::format::FormatError),
}

/// Everything that goes into one archive.
pub struct ArchiveContents<'a> {
    pub frames: &'a FrameChain,
    pub context: &'a ExportContext,
    pub models: &'a dyn ModelProvider,
    /// Block atlas, extracted on the render thread.
    pub atlas: ExtractionFuture<RgbaImage>,
}

/// Summary of a written archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub frames: usize,
    pub sections: usize,
    pub block_updates: usize,
    pub meshes: usize,
    pub face_layers: u32,
    pub materials: usize,
    pub textures: usize,
    pub dangling_textures: usize,
}

impl fmt::Display for ArchiveStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Archive Statistics")?;
        writeln!(f, "==================")?;
        writeln!(f, "Frames:           {}", self.frames)?;
        writeln!(f, "Sections:         {}", self.sections)?;
        writeln!(f, "Block updates:    {}", self.block_updates)?;
        writeln!(f, "Meshes:           {}", self.meshes)?;
        writeln!(f, "Face layers:      {}", self.face_layers)?;
        writeln!(f, "Materials:        {}", self.materials)?;
        writeln!(f, "Textures:         {}", self.textures)?;
        if self.dangling_textures > 0 {
            writeln!(f, "Missing textures: {}", self.dangling_textures)?;
        }
        Ok(())
    }
}

/// Writes archive entries into a zip container.
pub struct ArchiveWriter<W: Write + Seek> {
    zip: ZipWriter<W>,
    options: SimpleFileOptions,
    stats: ArchiveStats,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            zip: ZipWriter::new(out),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
            stats: ArchiveStats::default(),
        }
    }

    fn start(&mut self, path: String) -> Result<(), ArchiveError> {
        self.zip.start_file(path, self.options)?;
        Ok(())
    }

    pub fn write_world(&mut self, frames: &FrameChain) -> Result<(), ArchiveError> {
        log::info!("Compiling frames");
        let world = WorldTag {
            frames: frames.iter().map(FrameTag::from_frame).collect(),
        };
        for frame in frames.iter() {
            match frame {
                Frame::Intracoded(f) => self.stats.sections += f.sections().len(),
                Frame::Predicted(f) => self.stats.block_updates += f.updates().len(),
            }
        }
        self.stats.frames = world.frames.len();

        let bytes = fastnbt::to_bytes(&world)?;
        self.start(WORLD_ENTRY.to_string())?;
        self.zip.write_all(&bytes)?;
        Ok(())
    }

    pub fn write_mesh(&mut self, id: &str, mesh: &Mesh) -> Result<(), ArchiveError> {
        log::debug!("Writing mesh: {id}");
        self.start(mesh_path(id))?;
        mesh.write_obj(&mut self.zip)?;
        self.stats.meshes += 1;
        self.stats.face_layers = self.stats.face_layers.max(mesh.layer_count());
        Ok(())
    }

    /// Write every palette mesh plus the empty mesh.
    ///
    /// Returns the names of all materials the meshes use.
    pub fn write_meshes(
        &mut self,
        context: &ExportContext,
        models: &dyn ModelProvider,
    ) -> Result<BTreeSet<String>, ArchiveError> {
        log::info!("Writing meshes");
        let entries = context.model_entries();
        let mut meshes: Vec<(String, Mesh)> = entries
            .par_iter()
            .map(|(id, entry)| (id.clone(), entry.build_mesh(models)))
            .collect();
        meshes.extend(context.extra_models());

        let mut materials = BTreeSet::new();
        for (id, mesh) in &meshes {
            self.write_mesh(id, mesh)?;
            materials.extend(mesh.material_names().into_iter().map(String::from));
        }
        self.write_mesh(EMPTY_MESH, &Mesh::default())?;
        Ok(materials)
    }

    /// Write registered materials plus the world materials `mesh_materials`
    /// names. Registered materials win on a name clash.
    ///
    /// Returns the written materials.
    pub fn write_materials(
        &mut self,
        context: &ExportContext,
        mesh_materials: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Material>, ArchiveError> {
        log::info!("Writing materials");
        let mut materials = context.materials();
        for name in mesh_materials {
            match WorldMaterial::from_name(name) {
                Some(world) => {
                    materials.entry(name.clone()).or_insert_with(|| world.to_material());
                }
                None if !materials.contains_key(name) => {
                    log::warn!("Mesh material {name} was never registered");
                }
                None => {}
            }
        }

        for (name, material) in &materials {
            self.start(material_path(name))?;
            material.write_to(&mut self.zip)?;
        }
        self.stats.materials = materials.len();
        Ok(materials)
    }

    /// Resolve dependencies of `textures` and write them all.
    pub fn write_textures(
        &mut self,
        textures: BTreeMap<String, Arc<dyn ReplayTexture>>,
    ) -> Result<BTreeSet<String>, ArchiveError> {
        log::info!("Writing textures");
        let textures = resolve_textures(textures);
        for (name, texture) in &textures {
            log::debug!("Writing texture: {name}");
            self.start(texture_path(name, texture.extension()))?;
            texture.write(&mut self.zip)?;
        }
        self.stats.textures = textures.len();
        Ok(textures.into_keys().collect())
    }

    pub fn write_meta(&mut self, meta: &VcapMeta) -> Result<(), ArchiveError> {
        log::info!("Writing Vcap metadata");
        self.start(META_ENTRY.to_string())?;
        serde_json::to_writer_pretty(&mut self.zip, meta)?;
        Ok(())
    }

    pub fn finish(self) -> Result<(W, ArchiveStats), ArchiveError> {
        let out = self.zip.finish()?;
        Ok((out, self.stats))
    }
}

/// Write a complete archive.
///
/// Blocks on the atlas extraction; a timeout or extraction failure aborts
/// the save. Materials referencing textures that were never provided are
/// reported and written anyway.
pub fn write_archive<W: Write + Seek>(out: W, contents: ArchiveContents<'_>) -> Result<(W, ArchiveStats), ArchiveError> {
    let ArchiveContents {
        frames,
        context,
        models,
        atlas,
    } = contents;
    let mut writer = ArchiveWriter::new(out);

    writer.write_world(frames)?;
    let mesh_materials = writer.write_meshes(context, models)?;
    let materials = writer.write_materials(context, &mesh_materials)?;

    log::info!("Extracting textures");
    let atlas = atlas.wait(context.settings().texture_timeout())?;
    let mut textures: BTreeMap<String, Arc<dyn ReplayTexture>> = BTreeMap::new();
    textures.insert(WORLD_TEXTURE.to_string(), Arc::new(ImageTexture::new(atlas)));
    textures.extend(context.textures());
    let written = writer.write_textures(textures)?;

    for (name, material) in &materials {
        for texture in material.texture_refs() {
            if !written.contains(texture) {
                log::warn!("Material {name} references missing texture {texture}");
                writer.stats.dangling_textures += 1;
            }
        }
    }

    let mut meta = VcapMeta::new(context.settings().offset, writer.stats.face_layers);
    meta.block_types = context.id_mapping();
    writer.write_meta(&meta)?;

    let (out, stats) = writer.finish()?;
    log::info!("Finished writing Vcap");
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use super::*;
    use crate::archive::{ArchiveReader, Recovery};
    use crate::capture::IFrame;
    use crate::schema::VcapSettings;
    use crate::world::SimpleModels;

    fn write(context: &ExportContext) -> (Vec<u8>, ArchiveStats) {
        let mut frames = FrameChain::new();
        frames.push(IFrame::new(0.0, Vec::new(), HashMap::new()));
        let contents = ArchiveContents {
            frames: &frames,
            context,
            models: &SimpleModels::new(),
            atlas: ExtractionFuture::ready(Ok(RgbaImage::new(16, 16))),
        };
        let (out, stats) = write_archive(Cursor::new(Vec::new()), contents).unwrap();
        (out.into_inner(), stats)
    }

    #[test]
    fn test_empty_capture() {
        let context = ExportContext::new(VcapSettings::default());
        let (bytes, stats) = write(&context);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.meshes, 1);
        assert_eq!(stats.textures, 1);

        let loaded = ArchiveReader::new(Cursor::new(bytes))
            .unwrap()
            .load(|_| Recovery::Abort)
            .unwrap();
        assert!(loaded.meshes[EMPTY_MESH].is_empty());
        assert!(loaded.textures.contains_key(WORLD_TEXTURE));
    }

    #[test]
    fn test_dangling_texture_counted() {
        let context = ExportContext::new(VcapSettings::default());
        context.add_material("banner", Material::default().with_color("banner_pattern"));
        context.add_material("plain", Material::default().with_color([1.0, 0.0, 0.0]));
        let (_, stats) = write(&context);
        assert_eq!(stats.materials, 2);
        assert_eq!(stats.dangling_textures, 1);
    }

    #[test]
    fn test_registered_material_wins() {
        let context = ExportContext::new(VcapSettings::default());
        let custom = Material::default().with_roughness(0.2);
        context.add_material("world", custom.clone());

        let mut writer = ArchiveWriter::new(Cursor::new(Vec::new()));
        let names = BTreeSet::from(["world".to_string(), "world_trans".to_string(), "mystery".to_string()]);
        let materials = writer.write_materials(&context, &names).unwrap();
        assert_eq!(materials["world"], custom);
        assert!(materials["world_trans"].transparent);
        assert!(!materials.contains_key("mystery"));
    }
}
