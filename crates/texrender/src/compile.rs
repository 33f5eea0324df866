use std::borrow::Cow;

use crate::error::ShaderError;
use crate::gles::{check_gl_error, Gles, ProgramId, ShaderId, ShaderKind};
use crate::types::SamplerTarget;

/// Pass-through vertex shader for the fullscreen quad.
pub const VERTEX_SHADER: &str = "attribute vec4 aPosition;
attribute vec2 aTextureCoord;
varying vec2 vTextureCoord;
void main() {
  gl_Position = aPosition;
  vTextureCoord = aTextureCoord;
}
";

/// Samples the stream texture through the external-image extension.
pub const EXTERNAL_FRAGMENT_SHADER: &str = "#extension GL_OES_EGL_image_external : require
precision mediump float;
varying vec2 vTextureCoord;
uniform samplerExternalOES sTexture;
void main() {
  gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// Same as [`EXTERNAL_FRAGMENT_SHADER`] for streams latched into a plain 2D
/// texture.
pub const TEXTURE_2D_FRAGMENT_SHADER: &str = "precision mediump float;
varying vec2 vTextureCoord;
uniform sampler2D sTexture;
void main() {
  gl_FragColor = texture2D(sTexture, vTextureCoord);
}
";

/// The shader pair a renderer links on every surface-created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

impl ShaderSources {
    pub fn for_target(target: SamplerTarget) -> Self {
        let fragment = match target {
            SamplerTarget::External => EXTERNAL_FRAGMENT_SHADER,
            SamplerTarget::Texture2d => TEXTURE_2D_FRAGMENT_SHADER,
        };
        Self {
            vertex: Cow::Borrowed(VERTEX_SHADER),
            fragment: Cow::Borrowed(fragment),
        }
    }

    /// Replaces the fragment stage, keeping the stock vertex shader.
    pub fn with_fragment(mut self, fragment: impl Into<Cow<'static, str>>) -> Self {
        self.fragment = fragment.into();
        self
    }
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::for_target(SamplerTarget::default())
    }
}

/// Compiles one shader stage. A compile failure logs the driver's info log
/// and deletes the shader before returning.
pub fn load_shader(
    gl: &mut dyn Gles,
    kind: ShaderKind,
    source: &str,
) -> Result<ShaderId, ShaderError> {
    let shader = gl
        .create_shader(kind)
        .ok_or(ShaderError::CreateShader(kind))?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.shader_compile_status(shader) {
        let log = gl.shader_info_log(shader);
        tracing::error!(%kind, log = %log.trim_end(), "could not compile shader");
        gl.delete_shader(shader);
        return Err(ShaderError::Compile { kind, log });
    }
    Ok(shader)
}

/// Compiles both stages and links them into a program.
///
/// On any failure every object created so far is deleted. The shaders are
/// flagged for deletion after a successful link as well; GL keeps them alive
/// while they stay attached.
pub fn create_program(
    gl: &mut dyn Gles,
    sources: &ShaderSources,
) -> Result<ProgramId, ShaderError> {
    let vertex = load_shader(gl, ShaderKind::Vertex, &sources.vertex)?;
    let fragment = match load_shader(gl, ShaderKind::Fragment, &sources.fragment) {
        Ok(shader) => shader,
        Err(err) => {
            gl.delete_shader(vertex);
            return Err(err);
        }
    };

    let linked = link(gl, vertex, fragment);
    gl.delete_shader(vertex);
    gl.delete_shader(fragment);
    linked
}

fn link(
    gl: &mut dyn Gles,
    vertex: ShaderId,
    fragment: ShaderId,
) -> Result<ProgramId, ShaderError> {
    let program = gl.create_program().ok_or(ShaderError::CreateProgram)?;

    let attached = (|| {
        gl.attach_shader(program, vertex);
        check_gl_error(gl, "glAttachShader")?;
        gl.attach_shader(program, fragment);
        check_gl_error(gl, "glAttachShader")
    })();
    if let Err(err) = attached {
        gl.delete_program(program);
        return Err(err.into());
    }

    gl.link_program(program);
    if !gl.program_link_status(program) {
        let log = gl.program_info_log(program);
        tracing::error!(log = %log.trim_end(), "could not link program");
        gl.delete_program(program);
        return Err(ShaderError::Link { log });
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gles::{GlCall, RecordingGles, INVALID_VALUE};

    #[test]
    fn stock_sources_link() {
        let mut gl = RecordingGles::new(4, 4);
        for target in [SamplerTarget::External, SamplerTarget::Texture2d] {
            let program = create_program(&mut gl, &ShaderSources::for_target(target)).unwrap();
            assert!(gl.program_exists(program));
        }
    }

    #[test]
    fn shaders_are_released_after_linking() {
        let mut gl = RecordingGles::new(4, 4);
        create_program(&mut gl, &ShaderSources::default()).unwrap();
        let deleted = gl
            .calls()
            .iter()
            .filter(|call| matches!(call, GlCall::DeleteShader { .. }))
            .count();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn broken_fragment_deletes_the_vertex_shader() {
        let mut gl = RecordingGles::new(4, 4);
        let sources = ShaderSources::default().with_fragment("void main() { gl_FragColor = ; ");
        let err = create_program(&mut gl, &sources).unwrap_err();
        assert!(matches!(
            err,
            ShaderError::Compile {
                kind: ShaderKind::Fragment,
                ..
            }
        ));

        let vertex = gl
            .calls()
            .iter()
            .find_map(|call| match call {
                GlCall::CreateShader {
                    kind: ShaderKind::Vertex,
                    shader,
                } => *shader,
                _ => None,
            })
            .unwrap();
        assert!(!gl.shader_exists(vertex));
        assert!(!gl
            .calls()
            .iter()
            .any(|call| matches!(call, GlCall::CreateProgram { .. })));
    }

    #[test]
    fn link_failure_deletes_the_program() {
        let mut gl = RecordingGles::new(4, 4);
        let sources = ShaderSources::default().with_fragment(
            "precision mediump float;\nvarying vec2 vMissing;\nvoid main() {\n  gl_FragColor = vec4(vMissing, 0.0, 1.0);\n}\n",
        );
        let err = create_program(&mut gl, &sources).unwrap_err();
        assert!(matches!(err, ShaderError::Link { .. }));

        let program = gl
            .calls()
            .iter()
            .find_map(|call| match call {
                GlCall::CreateProgram { program } => *program,
                _ => None,
            })
            .unwrap();
        assert!(!gl.program_exists(program));
    }

    #[test]
    fn attach_errors_are_checked() {
        let mut gl = RecordingGles::new(4, 4);
        let vertex = load_shader(&mut gl, ShaderKind::Vertex, VERTEX_SHADER).unwrap();
        let fragment =
            load_shader(&mut gl, ShaderKind::Fragment, EXTERNAL_FRAGMENT_SHADER).unwrap();
        gl.push_error(INVALID_VALUE);

        let err = link(&mut gl, vertex, fragment).unwrap_err();
        match err {
            ShaderError::Gl(gl_err) => {
                assert_eq!(gl_err.op, "glAttachShader");
                assert_eq!(gl_err.code, INVALID_VALUE);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
