//! Capture settings.

use serde::{Deserialize, Serialize};

use super::{BlockPos, CaptureBounds};

/// Default fluid flood-fill depth limit.
pub const DEFAULT_FLOOD_DEPTH: u32 = 5000;

/// Default geometric tolerance when comparing fluid meshes.
pub const DEFAULT_FLUID_EPSILON: f32 = 0.01;

/// Default time to wait for render-thread texture extraction.
pub const DEFAULT_TEXTURE_TIMEOUT_MS: u64 = 5000;

/// How fluids are exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluidMode {
    /// Fluids are exported like any other block.
    None,
    /// Fluid bodies are meshed as domains in the intracoded frame only.
    #[default]
    Static,
    /// Fluid bodies are also re-captured in predicted frames.
    Dynamic,
}

impl FluidMode {
    pub fn export_static(self) -> bool {
        matches!(self, FluidMode::Static | FluidMode::Dynamic)
    }

    pub fn export_dynamic(self) -> bool {
        matches!(self, FluidMode::Dynamic)
    }
}

/// Neighborhood used by the fluid flood fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// 6 face neighbors.
    #[default]
    Faces,
    /// Faces plus the 12 edge neighbors.
    Edges,
    /// Faces, edges and the 8 corner neighbors.
    Corners,
}

impl Connectivity {
    pub fn neighbor_count(self) -> usize {
        match self {
            Connectivity::Faces => 6,
            Connectivity::Edges => 18,
            Connectivity::Corners => 26,
        }
    }
}

/// Flood fill parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloodFillConfig {
    #[serde(default)]
    pub connectivity: Connectivity,
    /// Maximum breadth-first distance from the seed.
    #[serde(default = "default_depth")]
    pub max_depth: u32,
}

impl Default for FloodFillConfig {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Faces,
            max_depth: DEFAULT_FLOOD_DEPTH,
        }
    }
}

fn default_depth() -> u32 {
    DEFAULT_FLOOD_DEPTH
}

fn default_epsilon() -> f32 {
    DEFAULT_FLUID_EPSILON
}

fn default_timeout() -> u64 {
    DEFAULT_TEXTURE_TIMEOUT_MS
}

/// Settings for one capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcapSettings {
    /// Region to capture.
    pub bounds: CaptureBounds,
    #[serde(default)]
    pub fluid_mode: FluidMode,
    #[serde(default)]
    pub flood_fill: FloodFillConfig,
    /// Tolerance for fluid mesh equality.
    #[serde(default = "default_epsilon")]
    pub fluid_epsilon: f32,
    /// Timeout for render-thread texture extraction, in milliseconds.
    #[serde(default = "default_timeout")]
    pub texture_timeout_ms: u64,
    /// Spatial offset written to the archive metadata.
    #[serde(default)]
    pub offset: [i32; 3],
}

impl Default for VcapSettings {
    fn default() -> Self {
        Self {
            bounds: CaptureBounds::default(),
            fluid_mode: FluidMode::default(),
            flood_fill: FloodFillConfig::default(),
            fluid_epsilon: DEFAULT_FLUID_EPSILON,
            texture_timeout_ms: DEFAULT_TEXTURE_TIMEOUT_MS,
            offset: [0, 0, 0],
        }
    }
}

impl VcapSettings {
    pub fn new(bounds: CaptureBounds) -> Self {
        Self {
            bounds,
            ..Default::default()
        }
    }

    pub fn with_fluid_mode(mut self, fluid_mode: FluidMode) -> Self {
        self.fluid_mode = fluid_mode;
        self
    }

    /// Whether a block lies inside the export region.
    #[inline]
    pub fn is_in_export(&self, pos: BlockPos) -> bool {
        self.bounds.contains(pos)
    }

    pub fn texture_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.texture_timeout_ms)
    }

    /// Validate settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bounds.is_empty() {
            return Err(ConfigError::EmptyBounds);
        }
        if self.flood_fill.max_depth == 0 {
            return Err(ConfigError::InvalidFloodDepth);
        }
        if self.fluid_epsilon.is_nan() || self.fluid_epsilon < 0.0 {
            return Err(ConfigError::InvalidEpsilon(self.fluid_epsilon));
        }
        if self.texture_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        Ok(())
    }
}

/// Settings validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Capture bounds must cover at least one section")]
    EmptyBounds,
    #[error("Flood fill depth must be non-zero")]
    InvalidFloodDepth,
    #[error("Fluid epsilon must be non-negative, got {0}")]
    InvalidEpsilon(f32),
    #[error("Texture timeout must be non-zero")]
    InvalidTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ChunkPos;

    #[test]
    fn test_default_settings_valid() {
        let settings = VcapSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.fluid_mode, FluidMode::Static);
        assert_eq!(settings.flood_fill.max_depth, 5000);
        assert_eq!(settings.texture_timeout().as_secs(), 5);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let settings = VcapSettings::new(CaptureBounds::new(ChunkPos::new(2, 0), ChunkPos::new(1, 1)));
        assert!(matches!(settings.validate(), Err(ConfigError::EmptyBounds)));
    }

    #[test]
    fn test_nan_epsilon_rejected() {
        let settings = VcapSettings {
            fluid_epsilon: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidEpsilon(_))));
    }

    #[test]
    fn test_fluid_mode_flags() {
        assert!(!FluidMode::None.export_static());
        assert!(FluidMode::Static.export_static());
        assert!(!FluidMode::Static.export_dynamic());
        assert!(FluidMode::Dynamic.export_static());
        assert!(FluidMode::Dynamic.export_dynamic());
    }

    #[test]
    fn test_settings_json_defaults() {
        let json = r#"{ "bounds": { "min_chunk": { "x": 0, "z": 0 }, "max_chunk": { "x": 2, "z": 2 } } }"#;
        let settings: VcapSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.bounds.sections, -4..20);
        assert_eq!(settings.fluid_mode, FluidMode::Static);
        assert_eq!(settings.flood_fill.connectivity, Connectivity::Faces);
        assert!((settings.fluid_epsilon - 0.01).abs() < 1e-9);
    }
}
