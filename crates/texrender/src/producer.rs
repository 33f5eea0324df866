//! Frame producers feeding a stream texture through its [`Surface`].

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::ProducerError;
use crate::stream::{PixelFormat, Surface, SurfaceError};

/// Producer side of the external-texture source.
///
/// The renderer hands over a fresh [`Surface`] on every surface-created and
/// calls [`FrameProducer::consume_frame`] once per draw, after latching.
pub trait FrameProducer: Send {
    fn submit_surface(&mut self, surface: Surface) -> Result<(), ProducerError>;
    fn consume_frame(&mut self) -> Result<(), ProducerError>;
}

impl<P: FrameProducer + ?Sized> FrameProducer for Box<P> {
    fn submit_surface(&mut self, surface: Surface) -> Result<(), ProducerError> {
        (**self).submit_surface(surface)
    }

    fn consume_frame(&mut self) -> Result<(), ProducerError> {
        (**self).consume_frame()
    }
}

pub const STRIPE_WIDTH: u32 = 640;
pub const STRIPE_HEIGHT: u32 = 480;

const RED: [u8; 4] = [0xFF, 0x00, 0x00, 0x00];
const YELLOW: [u8; 4] = [0xFF, 0xFF, 0x00, 0x00];

/// Fills every row with alternating red and yellow pixels, four at a time.
///
/// Alpha is left at zero. Widths that are not a multiple of four and
/// non-RGBA buffers are rejected.
#[derive(Debug)]
pub struct StripeProducer {
    width: u32,
    height: u32,
    surface: Option<Surface>,
    frames: u64,
}

impl StripeProducer {
    pub fn new() -> Self {
        Self::with_size(STRIPE_WIDTH, STRIPE_HEIGHT)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            surface: None,
            frames: 0,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }
}

impl Default for StripeProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProducer for StripeProducer {
    fn submit_surface(&mut self, surface: Surface) -> Result<(), ProducerError> {
        if self.surface.take().is_some() {
            debug!("releasing previously held surface");
        }
        if let Err(err) = surface.set_buffers_geometry(self.width, self.height, PixelFormat::Rgba8888)
        {
            error!(width = self.width, height = self.height, %err, "failed to set buffers geometry");
            return Err(err.into());
        }
        self.surface = Some(surface);
        Ok(())
    }

    fn consume_frame(&mut self) -> Result<(), ProducerError> {
        let surface = self.surface.as_ref().ok_or(ProducerError::NoSurface)?;
        // Rejected geometry must not leave the surface locked.
        let geometry = surface.geometry();
        if geometry.format != PixelFormat::Rgba8888 {
            return Err(SurfaceError::UnsupportedFormat(geometry.format).into());
        }
        if geometry.width % 4 != 0 {
            return Err(ProducerError::UnalignedWidth(geometry.width));
        }

        let mut buffer = match surface.lock() {
            Ok(buffer) => buffer,
            Err(err) => {
                error!(%err, "failed to lock window");
                return Ok(());
            }
        };

        let row_bytes = buffer.stride() as usize * 4;
        let visible = buffer.width() as usize * 4;
        for row in buffer.bits_mut().chunks_exact_mut(row_bytes) {
            for (index, pixel) in row[..visible].chunks_exact_mut(4).enumerate() {
                pixel.copy_from_slice(if index % 2 == 0 { &RED } else { &YELLOW });
            }
        }

        surface.unlock_and_post(buffer)?;
        self.frames += 1;
        Ok(())
    }
}

enum ProducerCommand {
    Submit {
        surface: Surface,
        reply: Sender<Result<(), ProducerError>>,
    },
    Consume,
    Shutdown,
}

/// Runs a [`FrameProducer`] on its own thread.
///
/// `submit_surface` waits for the worker so setup failures surface on the
/// render thread. `consume_frame` only queues a request; a failure on the
/// worker is reported by the next call.
pub struct ProducerThread {
    commands: Sender<ProducerCommand>,
    failures: Receiver<ProducerError>,
    join_handle: Option<JoinHandle<()>>,
}

impl ProducerThread {
    pub fn spawn<P>(producer: P) -> Result<Self, ProducerError>
    where
        P: FrameProducer + 'static,
    {
        let (commands_tx, commands_rx) = unbounded();
        let (failures_tx, failures_rx) = unbounded();
        let handle = thread::Builder::new()
            .name("texrender-producer".into())
            .spawn(move || run_producer(producer, commands_rx, failures_tx))
            .map_err(ProducerError::Spawn)?;

        Ok(Self {
            commands: commands_tx,
            failures: failures_rx,
            join_handle: Some(handle),
        })
    }

    fn take_failure(&self) -> Result<(), ProducerError> {
        match self.failures.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = self.commands.send(ProducerCommand::Shutdown);
            if handle.join().is_err() {
                warn!("producer thread panicked");
            }
        }
    }
}

impl FrameProducer for ProducerThread {
    fn submit_surface(&mut self, surface: Surface) -> Result<(), ProducerError> {
        self.take_failure()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(ProducerCommand::Submit {
                surface,
                reply: reply_tx,
            })
            .map_err(|_| ProducerError::Disconnected)?;
        reply_rx.recv().map_err(|_| ProducerError::Disconnected)?
    }

    fn consume_frame(&mut self) -> Result<(), ProducerError> {
        self.take_failure()?;
        self.commands
            .send(ProducerCommand::Consume)
            .map_err(|_| ProducerError::Disconnected)
    }
}

impl Drop for ProducerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ProducerThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerThread")
            .field("running", &self.join_handle.is_some())
            .finish()
    }
}

fn run_producer<P: FrameProducer>(
    mut producer: P,
    commands: Receiver<ProducerCommand>,
    failures: Sender<ProducerError>,
) {
    for command in commands.iter() {
        match command {
            ProducerCommand::Submit { surface, reply } => {
                let _ = reply.send(producer.submit_surface(surface));
            }
            ProducerCommand::Consume => {
                if let Err(err) = producer.consume_frame() {
                    error!(%err, "producer failed to produce a frame");
                    let _ = failures.send(err);
                }
            }
            ProducerCommand::Shutdown => break,
        }
    }
    debug!("producer thread exiting");
}
