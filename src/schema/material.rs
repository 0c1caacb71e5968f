//! Material descriptors written to `mat/<name>.json`.
//!
//! Material slots hold a [`Field`], which serializes by shape alone:
//! a JSON number is a scalar, a 3-element array is a vector and a string
//! names a texture in the archive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Read, Write};

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Texture name of the extracted block atlas.
pub const WORLD_TEXTURE: &str = "world";

/// Override value that routes a slot to the mesh vertex colors.
pub const VERTEX_COLOR_OVERRIDE: &str = "$VERTEX_COLOR";

/// Value of a material slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(f32),
    Vector([f32; 3]),
    /// Name of a texture in the archive (without extension).
    Texture(String),
}

impl Field {
    pub fn texture(&self) -> Option<&str> {
        match self {
            Field::Texture(name) => Some(name),
            _ => None,
        }
    }
}

impl From<f32> for Field {
    fn from(value: f32) -> Self {
        Field::Scalar(value)
    }
}

impl From<[f32; 3]> for Field {
    fn from(value: [f32; 3]) -> Self {
        Field::Vector(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Texture(value.to_string())
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Scalar(value) => serializer.serialize_f32(*value),
            Field::Vector(value) => value.serialize(serializer),
            Field::Texture(name) => serializer.serialize_str(name),
        }
    }
}

struct FieldVisitor;

impl<'de> Visitor<'de> for FieldVisitor {
    type Value = Field;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, a 3-element array or a texture name")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Field, E> {
        Ok(Field::Scalar(v as f32))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Field, E> {
        Ok(Field::Scalar(v as f32))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Field, E> {
        Ok(Field::Scalar(v as f32))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Field, E> {
        Ok(Field::Texture(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Field, E> {
        Ok(Field::Texture(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Field, A::Error> {
        let mut vector = [0.0f32; 3];
        for (i, slot) in vector.iter_mut().enumerate() {
            *slot = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        if seq.next_element::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(4, &self));
        }
        Ok(Field::Vector(vector))
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(FieldVisitor)
    }
}

/// How alpha is handled when rendering a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlphaMode {
    #[default]
    Opaque,
    Clip,
    Hashed,
    Blend,
}

/// Blend mode between `color` and `color2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBlendMode {
    #[default]
    Multiply,
    Mix,
    Darken,
    Lighten,
    Screen,
    Add,
    Overlay,
    SoftLight,
    Difference,
    Subtract,
}

/// A material descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color2: Option<Field>,
    pub color2_blend_mode: ColorBlendMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roughness: Option<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metallic: Option<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal: Option<Field>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emission: Option<Field>,
    pub emission_strength: f32,
    pub blend_mode: AlphaMode,
    /// Mirrors `blend_mode != Opaque` for readers that only know the flag.
    pub transparent: bool,
    pub use_vertex_colors: bool,
    pub tags: BTreeSet<String>,
    pub overrides: BTreeMap<String, String>,
}

impl Material {
    pub fn with_color(mut self, color: impl Into<Field>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_roughness(mut self, roughness: impl Into<Field>) -> Self {
        self.roughness = Some(roughness.into());
        self
    }

    pub fn with_emission(mut self, emission: impl Into<Field>, strength: f32) -> Self {
        self.emission = Some(emission.into());
        self.emission_strength = strength;
        self
    }

    /// Transparent materials use hashed alpha.
    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.blend_mode = if transparent {
            AlphaMode::Hashed
        } else {
            AlphaMode::Opaque
        };
        self.transparent = transparent;
        self
    }

    pub fn with_override(mut self, slot: &str, value: &str) -> Self {
        self.overrides.insert(slot.to_string(), value.to_string());
        self
    }

    /// Names of all textures referenced by this material's slots.
    pub fn texture_refs(&self) -> impl Iterator<Item = &str> {
        [
            &self.color,
            &self.color2,
            &self.roughness,
            &self.metallic,
            &self.normal,
            &self.emission,
        ]
        .into_iter()
        .filter_map(|field| field.as_ref().and_then(Field::texture))
    }

    pub fn write_to<W: Write>(&self, w: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(w, self)
    }

    pub fn load<R: Read>(r: R) -> serde_json::Result<Self> {
        serde_json::from_reader(r)
    }
}

/// Material generated for blocks that sample the world atlas.
///
/// Named `world[_trans][_tinted][_emit]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct WorldMaterial {
    pub transparent: bool,
    pub tinted: bool,
    pub emissive: bool,
}

impl WorldMaterial {
    pub fn name(self) -> String {
        let mut name = String::from(WORLD_TEXTURE);
        if self.transparent {
            name.push_str("_trans");
        }
        if self.tinted {
            name.push_str("_tinted");
        }
        if self.emissive {
            name.push_str("_emit");
        }
        name
    }

    /// Parse a generated world material name.
    pub fn from_name(name: &str) -> Option<Self> {
        let mut rest = name.strip_prefix(WORLD_TEXTURE)?;
        let mut material = WorldMaterial::default();
        for (suffix, flag) in [
            ("_trans", &mut material.transparent),
            ("_tinted", &mut material.tinted),
            ("_emit", &mut material.emissive),
        ] {
            if let Some(stripped) = rest.strip_prefix(suffix) {
                *flag = true;
                rest = stripped;
            }
        }
        rest.is_empty().then_some(material)
    }

    pub fn to_material(self) -> Material {
        let mut material = Material::default()
            .with_color(WORLD_TEXTURE)
            .with_roughness(1.0)
            .with_transparent(self.transparent);
        if self.tinted {
            material = material.with_override("color2", VERTEX_COLOR_OVERRIDE);
            material.use_vertex_colors = true;
        }
        if self.emissive {
            material = material.with_emission(WORLD_TEXTURE, 2.0);
        }
        material
    }
}

/// Descriptor written for animated textures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimatedTextureMeta {
    pub framerate: f32,
    pub frame_count: u32,
    /// Names of the per-frame textures.
    #[serde(default)]
    pub frames: Vec<String>,
}
