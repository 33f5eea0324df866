//! Headless GL ES 2.0 context on an EGL pbuffer.
//!
//! `libEGL` is loaded at runtime, so building this module does not require
//! EGL development files; creating a context does require a driver.

use anyhow::{anyhow, Context, Result};
use khronos_egl as egl;
use tracing::{debug, info, warn};

use crate::gles::{Gles, GlowGles};
use crate::host::{HostConfig, RenderContext};

type Egl = egl::DynamicInstance<egl::EGL1_4>;

const CONFIG_ATTRIBUTES: [egl::Int; 13] = [
    egl::SURFACE_TYPE,
    egl::PBUFFER_BIT,
    egl::RENDERABLE_TYPE,
    egl::OPENGL_ES2_BIT,
    egl::RED_SIZE,
    8,
    egl::GREEN_SIZE,
    8,
    egl::BLUE_SIZE,
    8,
    egl::ALPHA_SIZE,
    8,
    egl::NONE,
];

const CONTEXT_ATTRIBUTES: [egl::Int; 3] = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];

/// An EGL display, pbuffer surface and GL ES 2 context, current on the
/// thread that created it.
pub struct HeadlessEgl {
    egl: Egl,
    display: egl::Display,
    config: egl::Config,
    surface: egl::Surface,
    context: egl::Context,
    gl: GlowGles,
    width: u32,
    height: u32,
}

impl HeadlessEgl {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let egl = unsafe { Egl::load_required() }
            .map_err(|err| anyhow!("failed to load libEGL: {err}"))?;
        let display = unsafe { egl.get_display(egl::DEFAULT_DISPLAY) }
            .ok_or_else(|| anyhow!("no default EGL display"))?;
        let (major, minor) = egl
            .initialize(display)
            .context("eglInitialize failed")?;
        egl.bind_api(egl::OPENGL_ES_API)
            .context("eglBindAPI(OPENGL_ES) failed")?;
        let config = egl
            .choose_first_config(display, &CONFIG_ATTRIBUTES)
            .context("eglChooseConfig failed")?
            .ok_or_else(|| anyhow!("no EGL config with pbuffer + GLES2 support"))?;

        let surface = create_pbuffer(&egl, display, config, width, height)?;
        let context = match egl.create_context(display, config, None, &CONTEXT_ATTRIBUTES) {
            Ok(context) => context,
            Err(err) => {
                let _ = egl.destroy_surface(display, surface);
                return Err(anyhow!("eglCreateContext failed: {err}"));
            }
        };
        let gl = make_current(&egl, display, surface, context)?;

        let vendor = egl
            .query_string(Some(display), egl::VENDOR)
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(major, minor, %vendor, width, height, "EGL pbuffer context ready");

        Ok(Self {
            egl,
            display,
            config,
            surface,
            context,
            gl,
            width,
            height,
        })
    }

    /// Context factory for [`crate::host::SurfaceHost::spawn`].
    pub fn factory(config: &HostConfig) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(Self::new(config.width, config.height)?))
    }

    fn release(&mut self) {
        if let Err(err) = self.egl.make_current(self.display, None, None, None) {
            warn!(%err, "eglMakeCurrent(NONE) failed");
        }
        if let Err(err) = self.egl.destroy_surface(self.display, self.surface) {
            warn!(%err, "eglDestroySurface failed");
        }
        if let Err(err) = self.egl.destroy_context(self.display, self.context) {
            warn!(%err, "eglDestroyContext failed");
        }
    }
}

fn create_pbuffer(
    egl: &Egl,
    display: egl::Display,
    config: egl::Config,
    width: u32,
    height: u32,
) -> Result<egl::Surface> {
    let attributes = [
        egl::WIDTH,
        width as egl::Int,
        egl::HEIGHT,
        height as egl::Int,
        egl::NONE,
    ];
    egl.create_pbuffer_surface(display, config, &attributes)
        .with_context(|| format!("eglCreatePbufferSurface({width}x{height}) failed"))
}

fn make_current(
    egl: &Egl,
    display: egl::Display,
    surface: egl::Surface,
    context: egl::Context,
) -> Result<GlowGles> {
    egl.make_current(display, Some(surface), Some(surface), Some(context))
        .context("eglMakeCurrent failed")?;
    let gl = unsafe {
        glow::Context::from_loader_function(|name| {
            egl.get_proc_address(name)
                .map_or(std::ptr::null(), |function| function as *const std::ffi::c_void)
        })
    };
    Ok(unsafe { GlowGles::new(gl) })
}

impl RenderContext for HeadlessEgl {
    fn gles(&mut self) -> &mut dyn Gles {
        &mut self.gl
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let surface = create_pbuffer(&self.egl, self.display, self.config, width, height)?;
        self.egl
            .make_current(self.display, Some(surface), Some(surface), Some(self.context))
            .context("eglMakeCurrent failed")?;
        if let Err(err) = self.egl.destroy_surface(self.display, self.surface) {
            warn!(%err, "eglDestroySurface failed");
        }
        self.surface = surface;
        self.width = width;
        self.height = height;
        debug!(width, height, "pbuffer resized");
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        self.gl.finish();
        self.egl
            .swap_buffers(self.display, self.surface)
            .context("eglSwapBuffers failed")
    }

    fn recreate(&mut self) -> Result<()> {
        self.release();
        let surface = create_pbuffer(&self.egl, self.display, self.config, self.width, self.height)?;
        let context = self
            .egl
            .create_context(self.display, self.config, None, &CONTEXT_ATTRIBUTES)
            .context("eglCreateContext failed")?;
        self.gl = make_current(&self.egl, self.display, surface, context)?;
        self.surface = surface;
        self.context = context;
        Ok(())
    }

    fn label(&self) -> String {
        "egl".to_string()
    }
}

impl Drop for HeadlessEgl {
    fn drop(&mut self) {
        self.release();
        if let Err(err) = self.egl.terminate(self.display) {
            warn!(%err, "eglTerminate failed");
        }
    }
}
