use std::time::Duration;

use texrender::host::RenderContext;
use texrender::{
    BitmapOptions, FrameRenderer, HostConfig, RecordingGles, RenderMode, SamplerTarget,
    StripeProducer, SurfaceHost, TextureSource,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("texrender=debug")
        .with_test_writer()
        .try_init();
}

fn recording(config: &HostConfig) -> anyhow::Result<Box<dyn RenderContext>> {
    Ok(Box::new(RecordingGles::new(config.width, config.height)))
}

fn bitmap_renderer() -> FrameRenderer {
    FrameRenderer::new(
        TextureSource::GeneratedBitmap(BitmapOptions::default()),
        SamplerTarget::External,
    )
}

#[test]
fn dirty_mode_draws_once_without_requests() {
    let mut config = HostConfig::new(16, 16);
    config.render_mode = RenderMode::WhenDirty;
    config.run_for = Some(Duration::from_millis(150));

    let run = SurfaceHost::spawn(config, bitmap_renderer(), recording)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(run.report.frames_drawn, 1);
    assert_eq!(run.report.render_requests, 0);
}

#[test]
fn dirty_mode_follows_producer_frames() {
    init_tracing();
    let mut config = HostConfig::new(16, 16);
    config.render_mode = RenderMode::WhenDirty;
    config.max_frames = Some(5);
    config.run_for = Some(Duration::from_secs(10));

    let renderer = FrameRenderer::new(
        TextureSource::producer(StripeProducer::with_size(16, 16)),
        SamplerTarget::External,
    );
    let run = SurfaceHost::spawn(config, renderer, recording)
        .unwrap()
        .wait()
        .unwrap();

    // Each draw asks for a frame and each posted frame requests the next draw.
    assert_eq!(run.report.frames_drawn, 5);
    assert!(run.report.render_requests >= 4);
    assert_eq!(run.renderer.stats().frames_latched, 4);
}

#[test]
fn external_requests_trigger_draws() {
    let mut config = HostConfig::new(8, 8);
    config.render_mode = RenderMode::WhenDirty;

    let host = SurfaceHost::spawn(config, bitmap_renderer(), recording).unwrap();
    let first = host.capture().unwrap();
    host.request_render().unwrap();
    host.requester().request();
    let second = host.capture().unwrap();
    assert_eq!(first.dimensions(), (8, 8));
    assert_eq!(first, second);

    let run = host.shutdown().unwrap();
    assert!(run.report.frames_drawn >= 1);
    assert_eq!(run.report.render_requests, 2);
}

#[test]
fn resize_reaches_the_renderer() {
    let mut config = HostConfig::new(8, 8);
    config.render_mode = RenderMode::WhenDirty;

    let host = SurfaceHost::spawn(config, bitmap_renderer(), recording).unwrap();
    host.resize(12, 6).unwrap();
    let frame = host.capture().unwrap();
    assert_eq!(frame.dimensions(), (12, 6));

    let run = host.shutdown().unwrap();
    assert_eq!(run.report.resizes, 1);
    assert_eq!(run.renderer.viewport(), Some((12, 6)));
}

#[test]
fn recreated_surface_runs_setup_again() {
    init_tracing();
    let mut config = HostConfig::new(8, 8);
    config.render_mode = RenderMode::WhenDirty;

    let renderer = FrameRenderer::new(
        TextureSource::producer(StripeProducer::with_size(8, 8)),
        SamplerTarget::External,
    );
    let host = SurfaceHost::spawn(config, renderer, recording).unwrap();
    host.recreate_surface().unwrap();
    host.capture().unwrap();

    let run = host.shutdown().unwrap();
    assert_eq!(run.report.surfaces_created, 2);
    assert_eq!(run.renderer.stats().surfaces_created, 2);
}

#[test]
fn bitmap_capture_shows_the_gradient() {
    let mut config = HostConfig::new(32, 32);
    config.max_frames = Some(1);
    config.capture_final_frame = true;

    let run = SurfaceHost::spawn(config, bitmap_renderer(), recording)
        .unwrap()
        .wait()
        .unwrap();
    let frame = run.report.final_frame.unwrap();
    let top = frame.get_pixel(0, 0);
    let bottom = frame.get_pixel(0, 31);
    assert_ne!(top, bottom);
    // Blue dominates the top of the gradient, red the bottom.
    assert!(top.0[2] > top.0[0]);
    assert!(bottom.0[0] > bottom.0[2]);
}

#[test]
fn failing_setup_is_reported_by_spawn() {
    let renderer = bitmap_renderer().with_shader_sources(
        texrender::ShaderSources::default().with_fragment("void main() {"),
    );
    let err = SurfaceHost::spawn(HostConfig::new(8, 8), renderer, recording)
        .err()
        .unwrap();
    assert!(format!("{err:#}").contains("failed to create program"));
}

#[test]
#[ignore = "needs an EGL driver"]
#[cfg(feature = "egl")]
fn egl_pbuffer_renders_bitmap() {
    let mut config = HostConfig::new(64, 64);
    config.max_frames = Some(2);
    config.capture_final_frame = true;

    let renderer = FrameRenderer::new(
        TextureSource::GeneratedBitmap(BitmapOptions::default()),
        SamplerTarget::Texture2d,
    );
    let run = SurfaceHost::spawn(config, renderer, texrender::HeadlessEgl::factory)
        .unwrap()
        .wait()
        .unwrap();
    let frame = run.report.final_frame.unwrap();
    assert_ne!(frame.get_pixel(0, 0), frame.get_pixel(0, 63));
}
