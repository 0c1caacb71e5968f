//! Schema module - Coordinates, capture settings and material types.

mod coords;
mod material;
mod settings;

pub use coords::*;
pub use material::*;
pub use settings::*;
