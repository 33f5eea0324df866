//! The slice of OpenGL ES 2.0 the renderer actually touches.
//!
//! Every GL call the renderer makes goes through [`Gles`], which keeps context
//! ownership explicit: whoever owns the context hands a `&mut dyn Gles` to the
//! renderer for the duration of a callback. Two backends exist:
//!
//! - [`GlowGles`] forwards to a real driver through `glow` (feature `egl`).
//! - [`RecordingGles`] is an in-process backend that records every call,
//!   tracks object state like a driver would, and rasterises draws into a CPU
//!   framebuffer so readback works without a GPU.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::GlError;

#[cfg(feature = "egl")]
mod glow_backend;
pub mod recording;

#[cfg(feature = "egl")]
pub use glow_backend::GlowGles;
pub use recording::{DrawCall, GlCall, RecordingGles};

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;
pub const OUT_OF_MEMORY: u32 = 0x0505;

pub const COLOR_BUFFER_BIT: u32 = 0x4000;
pub const TEXTURE0: u32 = 0x84C0;

pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
pub const TEXTURE_WRAP_S: u32 = 0x2802;
pub const TEXTURE_WRAP_T: u32 = 0x2803;
pub const LINEAR: i32 = 0x2601;
pub const CLAMP_TO_EDGE: i32 = 0x812F;

/// Upper bound on error codes drained by [`check_gl_error`]; a lost context
/// may report errors forever.
const MAX_DRAINED_ERRORS: usize = 32;

macro_rules! gl_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub NonZeroU32);

        impl $name {
            /// Wraps a raw GL name, rejecting the reserved name `0`.
            pub fn from_raw(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

gl_name!(
    /// A compiled (or compiling) shader object.
    ShaderId
);
gl_name!(
    /// A program object. Always non-zero once created.
    ProgramId
);
gl_name!(
    /// A texture name.
    TextureId
);
gl_name!(
    /// A buffer object name.
    BufferId
);

/// Resolved uniform location inside a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

impl ShaderKind {
    pub fn gl_enum(self) -> u32 {
        match self {
            ShaderKind::Vertex => 0x8B31,
            ShaderKind::Fragment => 0x8B30,
        }
    }
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderKind::Vertex => f.write_str("vertex"),
            ShaderKind::Fragment => f.write_str("fragment"),
        }
    }
}

/// Texture binding points the renderer may sample from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// `GL_TEXTURE_2D`.
    Texture2d,
    /// `GL_TEXTURE_EXTERNAL_OES` from `GL_OES_EGL_image_external`.
    ExternalOes,
}

impl TextureTarget {
    pub fn gl_enum(self) -> u32 {
        match self {
            TextureTarget::Texture2d => 0x0DE1,
            TextureTarget::ExternalOes => 0x8D65,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Primitive {
    pub fn gl_enum(self) -> u32 {
        match self {
            Primitive::Triangles => 0x0004,
            Primitive::TriangleStrip => 0x0005,
            Primitive::TriangleFan => 0x0006,
        }
    }
}

/// GL ES 2.0 entry points used by the renderer.
///
/// Object creation returns `None` where the C API would return the reserved
/// name `0`. Methods take `&mut self` so recording backends can log queries
/// as well as mutations.
pub trait Gles {
    fn create_shader(&mut self, kind: ShaderKind) -> Option<ShaderId>;
    fn shader_source(&mut self, shader: ShaderId, source: &str);
    fn compile_shader(&mut self, shader: ShaderId);
    fn shader_compile_status(&mut self, shader: ShaderId) -> bool;
    fn shader_info_log(&mut self, shader: ShaderId) -> String;
    fn delete_shader(&mut self, shader: ShaderId);

    fn create_program(&mut self) -> Option<ProgramId>;
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn link_program(&mut self, program: ProgramId);
    fn program_link_status(&mut self, program: ProgramId) -> bool;
    fn program_info_log(&mut self, program: ProgramId) -> String;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);

    /// Returns `None` where GL would return `-1`.
    fn attrib_location(&mut self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn uniform_1_i32(&mut self, location: UniformLocation, value: i32);

    fn enable_vertex_attrib_array(&mut self, index: u32);
    fn create_buffer(&mut self) -> Option<BufferId>;
    fn bind_array_buffer(&mut self, buffer: Option<BufferId>);
    /// Uploads `data` into the bound `GL_ARRAY_BUFFER` with `GL_STATIC_DRAW`.
    fn array_buffer_data(&mut self, data: &[u8]);
    /// Float attribute pointer into the bound array buffer, never normalized.
    fn vertex_attrib_pointer_f32(&mut self, index: u32, size: i32, stride: i32, offset: i32);

    fn create_texture(&mut self) -> Option<TextureId>;
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: TextureTarget, texture: Option<TextureId>);
    fn tex_parameter_i32(&mut self, target: TextureTarget, parameter: u32, value: i32);
    /// Specifies level 0 of the bound texture as tightly packed RGBA8 rows.
    fn tex_image_2d_rgba(&mut self, target: TextureTarget, width: u32, height: u32, pixels: &[u8]);

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32);
    fn clear(&mut self, mask: u32);
    fn draw_arrays(&mut self, mode: Primitive, first: i32, count: i32);
    fn finish(&mut self);

    /// Pops one code off the error flag, `NO_ERROR` when none is pending.
    fn get_error(&mut self) -> u32;
    /// Reads back RGBA8 rows bottom-up, as `glReadPixels` does.
    fn read_pixels_rgba(&mut self, x: i32, y: i32, width: u32, height: u32) -> Vec<u8>;
}

/// Drains the GL error flag after `op`.
///
/// Every pending code is logged; the first one is reported and the rest are
/// carried on the error so nothing is lost.
pub fn check_gl_error(gl: &mut dyn Gles, op: &str) -> Result<(), GlError> {
    let mut codes = Vec::new();
    while codes.len() < MAX_DRAINED_ERRORS {
        let code = gl.get_error();
        if code == NO_ERROR {
            break;
        }
        tracing::error!(op, code, "{op}: glError {code}");
        codes.push(code);
    }

    match codes.split_first() {
        None => Ok(()),
        Some((&code, rest)) => Err(GlError {
            op: op.to_string(),
            code,
            drained: rest.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_gl_error_passes_when_flag_is_clear() {
        let mut gl = RecordingGles::new(4, 4);
        assert!(check_gl_error(&mut gl, "noop").is_ok());
    }

    #[test]
    fn check_gl_error_drains_every_pending_code() {
        let mut gl = RecordingGles::new(4, 4);
        gl.push_error(INVALID_ENUM);
        gl.push_error(INVALID_VALUE);

        let err = check_gl_error(&mut gl, "glAttachShader").unwrap_err();
        assert_eq!(err.op, "glAttachShader");
        assert_eq!(err.code, INVALID_ENUM);
        assert_eq!(err.drained, vec![INVALID_VALUE]);
        assert_eq!(err.to_string(), "glAttachShader: glError 1280");
        assert_eq!(gl.get_error(), NO_ERROR);
    }

    #[test]
    fn check_gl_error_stops_on_a_stuck_flag() {
        let mut gl = RecordingGles::new(4, 4);
        for _ in 0..100 {
            gl.push_error(OUT_OF_MEMORY);
        }
        let err = check_gl_error(&mut gl, "stuck").unwrap_err();
        assert_eq!(err.drained.len(), MAX_DRAINED_ERRORS - 1);
    }

    #[test]
    fn names_reject_zero() {
        assert!(ProgramId::from_raw(0).is_none());
        assert_eq!(TextureId::from_raw(7).map(TextureId::raw), Some(7));
    }
}
