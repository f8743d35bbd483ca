use serde::{Deserialize, Serialize};

use crate::DecodeResult;

/// Decoded material definition.
///
/// Texture references are content hashes of separate assets; resolving them
/// is the renderer's business, not the cache's.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_color")]
    pub base_color: [f32; 4],
    #[serde(default)]
    pub metallic: f32,
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub double_sided: bool,
    /// Hex hashes of texture assets referenced by this material.
    #[serde(default)]
    pub textures: Vec<String>,
}

fn default_base_color() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

fn default_roughness() -> f32 {
    1.0
}

impl Material {
    /// Parse the JSON form the service ships.
    pub fn parse(raw: &[u8]) -> DecodeResult<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Approximate resident size in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        let strings: usize = self.textures.iter().map(String::len).sum::<usize>()
            + self.name.as_deref().map_or(0, str::len);
        (std::mem::size_of::<Self>() + strings) as u64
    }
}
