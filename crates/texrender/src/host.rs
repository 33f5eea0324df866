//! Render-thread host standing in for a platform GL surface view.
//!
//! ```text
//!   caller thread                      render thread
//!   ─────────────                      ─────────────
//!   SurfaceHost::spawn ──────────────▶ make_context()
//!                                      on_surface_created / on_surface_changed
//!   request_render / resize ── cmd ──▶ drain commands ─▶ on_draw_frame ─▶ swap
//!   capture ───────────────── cmd ──▶ read_pixels ─▶ reply
//!   wait / shutdown ◀──────── join ── HostRun { report, renderer }
//! ```
//!
//! The context never leaves the render thread. Frame-available listeners and
//! other threads only ever send a render request, and any number of pending
//! requests collapse into one draw.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use tracing::{debug, error, info, warn};

use crate::error::RenderError;
use crate::gles::{Gles, RecordingGles};
use crate::renderer::{RenderRequester, SurfaceRenderer};
use crate::types::SurfaceConfig;

const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("render thread is not running")]
    Disconnected,
    #[error("render thread panicked")]
    Panicked,
    #[error("invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// When the host draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Draw on every frame interval whether or not anything changed.
    #[default]
    Continuously,
    /// Draw only after a render request, resize or surface creation.
    WhenDirty,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Continuously => f.write_str("continuous"),
            RenderMode::WhenDirty => f.write_str("dirty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub width: u32,
    pub height: u32,
    pub render_mode: RenderMode,
    /// Minimum spacing between draws in continuous mode.
    pub frame_interval: Duration,
    /// Stop after this many draws.
    pub max_frames: Option<u64>,
    /// Stop once this much time has passed since the surface was created.
    pub run_for: Option<Duration>,
    /// Read back the last drawn frame before the thread exits.
    pub capture_final_frame: bool,
}

impl HostConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            render_mode: RenderMode::default(),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            max_frames: None,
            run_for: None,
            capture_final_frame: false,
        }
    }

    fn validate(&self) -> Result<(), HostError> {
        if self.width == 0 || self.height == 0 {
            return Err(HostError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// A current GL context plus the drawable it renders into.
///
/// Implementations are created on the render thread and stay there.
pub trait RenderContext {
    fn gles(&mut self) -> &mut dyn Gles;
    fn surface_size(&self) -> (u32, u32);
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
    fn swap_buffers(&mut self) -> Result<()>;
    /// Throws away the context and drawable and creates fresh ones, as a
    /// platform does after losing its EGL context.
    fn recreate(&mut self) -> Result<()>;
    fn label(&self) -> String;
}

impl RenderContext for RecordingGles {
    fn gles(&mut self) -> &mut dyn Gles {
        self
    }

    fn surface_size(&self) -> (u32, u32) {
        self.framebuffer_size()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.resize_framebuffer(width, height);
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn recreate(&mut self) -> Result<()> {
        let (width, height) = self.framebuffer_size();
        *self = RecordingGles::new(width, height);
        Ok(())
    }

    fn label(&self) -> String {
        "recording".to_string()
    }
}

/// Reads the drawable back as a top-down RGBA image.
pub fn capture_frame(context: &mut dyn RenderContext) -> Result<RgbaImage> {
    let (width, height) = context.surface_size();
    let pixels = context.gles().read_pixels_rgba(0, 0, width, height);
    let mut image = RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("read back {width}x{height} pixels into a short buffer"))?;
    flip_vertical_in_place(&mut image);
    Ok(image)
}

/// What happened on the render thread.
#[derive(Debug, Clone, Default)]
pub struct HostReport {
    pub context: String,
    pub surfaces_created: u64,
    pub resizes: u64,
    pub render_requests: u64,
    pub frames_drawn: u64,
    pub elapsed: Duration,
    pub final_frame: Option<RgbaImage>,
}

/// Everything the render thread hands back when it stops.
#[derive(Debug)]
pub struct HostRun<R> {
    pub report: HostReport,
    pub renderer: R,
}

enum HostCommand {
    RequestRender,
    Resize { width: u32, height: u32 },
    RecreateSurface,
    Capture { reply: Sender<Result<RgbaImage>> },
    Shutdown,
}

pub type ContextFactory = Box<dyn FnOnce(&HostConfig) -> Result<Box<dyn RenderContext>> + Send>;

/// Owns the render thread driving one [`SurfaceRenderer`].
pub struct SurfaceHost<R> {
    commands: Sender<HostCommand>,
    join_handle: Option<JoinHandle<Result<HostRun<R>>>>,
}

impl<R: SurfaceRenderer + 'static> SurfaceHost<R> {
    /// Starts the render thread and waits until the first surface has been
    /// created. A failing context factory or surface-created callback is
    /// returned from here.
    pub fn spawn<F>(config: HostConfig, renderer: R, make_context: F) -> Result<Self>
    where
        F: FnOnce(&HostConfig) -> Result<Box<dyn RenderContext>> + Send + 'static,
    {
        config.validate()?;
        let (ready_tx, ready_rx) = bounded(1);
        let (commands_tx, commands_rx) = unbounded();
        let requests = commands_tx.clone();
        let handle = thread::Builder::new()
            .name("texrender-render".into())
            .spawn(move || {
                run_render_thread(
                    config,
                    renderer,
                    Box::new(make_context),
                    commands_rx,
                    requests,
                    ready_tx,
                )
            })
            .map_err(|err| anyhow!("failed to spawn render thread: {err}"))?;

        let mut host = Self {
            commands: commands_tx,
            join_handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(host),
            Ok(Err(message)) => {
                let joined = host.join();
                Err(joined.err().unwrap_or_else(|| anyhow!(message)))
            }
            Err(_) => Err(host
                .join()
                .err()
                .unwrap_or_else(|| anyhow!("render thread exited before initialising"))),
        }
    }

    fn send(&self, command: HostCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| HostError::Disconnected.into())
    }

    /// A requester that can be handed to other threads.
    pub fn requester(&self) -> RenderRequester {
        let commands = self.commands.clone();
        RenderRequester::new(move || {
            let _ = commands.send(HostCommand::RequestRender);
        })
    }

    pub fn request_render(&self) -> Result<()> {
        self.send(HostCommand::RequestRender)
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(HostError::InvalidSize { width, height }.into());
        }
        self.send(HostCommand::Resize { width, height })
    }

    /// Simulates context loss: the renderer sees a fresh surface-created.
    pub fn recreate_surface(&self) -> Result<()> {
        self.send(HostCommand::RecreateSurface)
    }

    /// Reads back the drawable, drawing once first if nothing has been drawn.
    pub fn capture(&self) -> Result<RgbaImage> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(HostCommand::Capture { reply: reply_tx })?;
        reply_rx
            .recv()
            .map_err(|_| anyhow::Error::from(HostError::Disconnected))?
    }

    /// Waits for the render thread to stop on its own, which requires a
    /// frame or time limit in the [`HostConfig`].
    pub fn wait(mut self) -> Result<HostRun<R>> {
        self.join()
    }

    pub fn shutdown(mut self) -> Result<HostRun<R>> {
        let _ = self.commands.send(HostCommand::Shutdown);
        self.join()
    }

    fn join(&mut self) -> Result<HostRun<R>> {
        let handle = self
            .join_handle
            .take()
            .ok_or(HostError::Disconnected)?;
        handle.join().map_err(|_| HostError::Panicked)?
    }
}

impl<R> Drop for SurfaceHost<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.commands.send(HostCommand::Shutdown);
            let _ = handle.join();
        }
    }
}

struct RenderLoop<R> {
    config: HostConfig,
    renderer: R,
    context: Box<dyn RenderContext>,
    report: HostReport,
    dirty: bool,
}

impl<R: SurfaceRenderer> RenderLoop<R> {
    fn create_surface(&mut self) -> Result<()> {
        let (width, height) = self.context.surface_size();
        let config = SurfaceConfig::new(width, height);
        self.renderer
            .on_surface_created(self.context.gles(), &config)
            .map_err(HostError::from)?;
        self.renderer
            .on_surface_changed(self.context.gles(), width, height)
            .map_err(HostError::from)?;
        self.report.surfaces_created += 1;
        self.dirty = true;
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        self.renderer
            .on_draw_frame(self.context.gles())
            .map_err(HostError::from)?;
        self.context.swap_buffers().context("swap buffers")?;
        self.report.frames_drawn += 1;
        self.dirty = false;
        Ok(())
    }

    /// Returns `false` once a shutdown was requested.
    fn handle(&mut self, command: HostCommand) -> Result<bool> {
        match command {
            HostCommand::RequestRender => {
                self.report.render_requests += 1;
                self.dirty = true;
            }
            HostCommand::Resize { width, height } => {
                self.context
                    .resize(width, height)
                    .with_context(|| format!("resize drawable to {width}x{height}"))?;
                self.renderer
                    .on_surface_changed(self.context.gles(), width, height)
                    .map_err(HostError::from)?;
                self.report.resizes += 1;
                self.dirty = true;
            }
            HostCommand::RecreateSurface => {
                info!("recreating surface");
                self.context.recreate().context("recreate context")?;
                self.create_surface()?;
            }
            HostCommand::Capture { reply } => {
                let captured = if self.report.frames_drawn == 0 {
                    self.draw().and_then(|_| capture_frame(self.context.as_mut()))
                } else {
                    capture_frame(self.context.as_mut())
                };
                match captured {
                    Ok(image) => {
                        let _ = reply.send(Ok(image));
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        let _ = reply.send(Err(anyhow!(message)));
                        return Err(err);
                    }
                }
            }
            HostCommand::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    fn finished(&self, started: Instant) -> bool {
        if let Some(limit) = self.config.max_frames {
            if self.report.frames_drawn >= limit {
                return true;
            }
        }
        matches!(self.config.run_for, Some(limit) if started.elapsed() >= limit)
    }

    /// How long to block for the next command; `None` blocks indefinitely.
    fn idle_timeout(&self, started: Instant, next_frame: Instant) -> Option<Duration> {
        let now = Instant::now();
        let until_deadline = self
            .config
            .run_for
            .map(|limit| (started + limit).saturating_duration_since(now));
        let until_frame = match self.config.render_mode {
            RenderMode::Continuously => Some(next_frame.saturating_duration_since(now)),
            RenderMode::WhenDirty if self.dirty => Some(Duration::ZERO),
            RenderMode::WhenDirty => None,
        };
        match (until_deadline, until_frame) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn run(&mut self, commands: &Receiver<HostCommand>) -> Result<()> {
        let started = Instant::now();
        let mut next_frame = started;
        while !self.finished(started) {
            let first = match self.idle_timeout(started, next_frame) {
                Some(timeout) if timeout.is_zero() => commands.try_recv().ok(),
                Some(timeout) => match commands.recv_timeout(timeout) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match commands.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };
            if let Some(command) = first {
                if !self.handle(command)? {
                    return Ok(());
                }
                for command in commands.try_iter() {
                    if !self.handle(command)? {
                        return Ok(());
                    }
                }
            }
            if self.finished(started) {
                break;
            }

            let now = Instant::now();
            let due = match self.config.render_mode {
                RenderMode::Continuously => now >= next_frame,
                RenderMode::WhenDirty => self.dirty,
            };
            if due {
                self.draw()?;
                next_frame = now + self.config.frame_interval;
            }
        }
        Ok(())
    }
}

fn run_render_thread<R: SurfaceRenderer>(
    config: HostConfig,
    mut renderer: R,
    make_context: ContextFactory,
    commands: Receiver<HostCommand>,
    requests: Sender<HostCommand>,
    ready_tx: Sender<Result<(), String>>,
) -> Result<HostRun<R>> {
    let context = match make_context(&config) {
        Ok(context) => context,
        Err(err) => {
            let err = err.context("failed to create render context");
            let _ = ready_tx.send(Err(format!("{err:#}")));
            return Err(err);
        }
    };
    info!(
        context = %context.label(),
        width = config.width,
        height = config.height,
        mode = %config.render_mode,
        "render thread started"
    );

    renderer.bind_requester(RenderRequester::new(move || {
        let _ = requests.send(HostCommand::RequestRender);
    }));

    let mut state = RenderLoop {
        report: HostReport {
            context: context.label(),
            ..HostReport::default()
        },
        config,
        renderer,
        context,
        dirty: false,
    };

    if let Err(err) = state.create_surface() {
        error!("{err:#}");
        let _ = ready_tx.send(Err(format!("{err:#}")));
        return Err(err);
    }
    let _ = ready_tx.send(Ok(()));

    let started = Instant::now();
    if let Err(err) = state.run(&commands) {
        error!("{err:#}");
        return Err(err);
    }
    state.report.elapsed = started.elapsed();

    if state.config.capture_final_frame {
        if state.report.frames_drawn == 0 {
            warn!("no frame was drawn; capturing the cleared drawable");
        }
        state.report.final_frame = Some(capture_frame(state.context.as_mut())?);
    }
    debug!(frames = state.report.frames_drawn, "render thread exiting");

    Ok(HostRun {
        report: state.report,
        renderer: state.renderer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::StripeProducer;
    use crate::renderer::{FrameRenderer, TextureSource};
    use crate::types::{BitmapOptions, SamplerTarget};

    fn recording(config: &HostConfig) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(RecordingGles::new(config.width, config.height)))
    }

    #[test]
    fn zero_sized_surface_is_rejected() {
        let renderer = FrameRenderer::new(
            TextureSource::GeneratedBitmap(BitmapOptions::default()),
            SamplerTarget::External,
        );
        let err = SurfaceHost::spawn(HostConfig::new(0, 8), renderer, recording)
            .err()
            .unwrap();
        assert!(err.to_string().contains("0x8"));
    }

    #[test]
    fn continuous_mode_stops_at_frame_limit() {
        let mut config = HostConfig::new(8, 8);
        config.max_frames = Some(3);
        config.frame_interval = Duration::from_millis(1);
        let renderer = FrameRenderer::new(
            TextureSource::producer(StripeProducer::with_size(8, 8)),
            SamplerTarget::External,
        );
        let run = SurfaceHost::spawn(config, renderer, recording)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(run.report.frames_drawn, 3);
        assert_eq!(run.renderer.stats().frames_drawn, 3);
        assert_eq!(run.report.surfaces_created, 1);
    }

    #[test]
    fn factory_errors_surface_from_spawn() {
        let renderer = FrameRenderer::new(
            TextureSource::GeneratedBitmap(BitmapOptions::default()),
            SamplerTarget::External,
        );
        let err = SurfaceHost::spawn(HostConfig::new(4, 4), renderer, |_| {
            Err(anyhow!("no display"))
        })
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("no display"));
    }
}
