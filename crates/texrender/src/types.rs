use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Stream buffer size used by the generated-bitmap source when none is given.
pub const DEFAULT_BITMAP_SIZE: (u32, u32) = (256, 256);

/// Text drawn onto the generated bitmap when none is given.
pub const DEFAULT_BITMAP_TEXT: &str = "GL TEST";

/// What the host knows about the surface at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// Requested GL ES major version. Surface setup rejects anything but 2.
    pub client_version: u32,
}

impl SurfaceConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            client_version: 2,
        }
    }
}

/// Which sampler type the fragment shader declares for `sTexture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerTarget {
    /// `samplerExternalOES` on `GL_TEXTURE_EXTERNAL_OES`.
    #[default]
    External,
    /// `sampler2D` on `GL_TEXTURE_2D`.
    Texture2d,
}

impl SamplerTarget {
    pub fn texture_target(self) -> crate::gles::TextureTarget {
        match self {
            SamplerTarget::External => crate::gles::TextureTarget::ExternalOes,
            SamplerTarget::Texture2d => crate::gles::TextureTarget::Texture2d,
        }
    }
}

impl fmt::Display for SamplerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerTarget::External => f.write_str("external"),
            SamplerTarget::Texture2d => f.write_str("2d"),
        }
    }
}

impl FromStr for SamplerTarget {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "external" | "oes" => Ok(SamplerTarget::External),
            "2d" | "texture2d" => Ok(SamplerTarget::Texture2d),
            other => Err(anyhow!("unknown sampler target '{other}'")),
        }
    }
}

/// Parameters of the software-drawn bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapOptions {
    pub width: u32,
    pub height: u32,
    pub text: String,
}

impl Default for BitmapOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_BITMAP_SIZE.0,
            height: DEFAULT_BITMAP_SIZE.1,
            text: DEFAULT_BITMAP_TEXT.to_string(),
        }
    }
}

/// Lifecycle of a frame renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererState {
    #[default]
    Uninitialized,
    SurfaceReady,
    SurfaceChanged,
    Rendering,
}

impl fmt::Display for RendererState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RendererState::Uninitialized => "uninitialized",
            RendererState::SurfaceReady => "surface-ready",
            RendererState::SurfaceChanged => "surface-changed",
            RendererState::Rendering => "rendering",
        };
        f.write_str(name)
    }
}

/// Counters accumulated by a renderer since it was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub surfaces_created: u64,
    pub frames_drawn: u64,
    /// Draws that latched a new stream buffer.
    pub frames_latched: u64,
    /// Stream buffers replaced before they could be latched.
    pub frames_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_target_parses_cli_spellings() {
        assert_eq!("2d".parse::<SamplerTarget>().unwrap(), SamplerTarget::Texture2d);
        assert_eq!(
            " External ".parse::<SamplerTarget>().unwrap(),
            SamplerTarget::External
        );
        assert!("cube".parse::<SamplerTarget>().is_err());
    }

    #[test]
    fn defaults_match_stock_setup() {
        let bitmap = BitmapOptions::default();
        assert_eq!((bitmap.width, bitmap.height), (256, 256));
        assert_eq!(SurfaceConfig::new(4, 4).client_version, 2);
        assert_eq!(SamplerTarget::default(), SamplerTarget::External);
    }
}
