use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use probeconfig::{BackendSetting, ProbeConfig, RenderModeSetting, SamplerSetting, SourceSetting};
use serde::Serialize;
use texrender::host::RenderContext;
use texrender::{
    BitmapOptions, FrameRenderer, HostConfig, HostRun, ProducerThread, RecordingGles, RenderMode,
    SamplerTarget, StripeProducer, SurfaceHost, TextureSource,
};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ConfigAction, RunArgs};
use crate::paths::AppPaths;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved texprobe paths");

    match cli.command {
        Some(Command::Config(command)) => match command.action {
            ConfigAction::Where => {
                print_where(&cli.run, &paths);
                Ok(())
            }
            ConfigAction::Show => {
                let config = load_config(&cli.run, &paths)?;
                let rendered = config
                    .to_toml_string()
                    .context("failed to render configuration as TOML")?;
                print!("{rendered}");
                Ok(())
            }
        },
        None => run_probe(&cli.run, &paths),
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_where(args: &RunArgs, paths: &AppPaths) {
    let file = config_path(args, paths);
    println!("config dir : {}", paths.config_dir().display());
    match file {
        Some(file) => println!("config file: {}", file.display()),
        None => println!(
            "config file: {} (missing, using defaults)",
            paths.config_file().display()
        ),
    }
}

fn config_path(args: &RunArgs, paths: &AppPaths) -> Option<PathBuf> {
    match &args.config {
        Some(path) => Some(path.clone()),
        None => {
            let default = paths.config_file();
            default.is_file().then_some(default)
        }
    }
}

fn load_config(args: &RunArgs, paths: &AppPaths) -> Result<ProbeConfig> {
    let mut config = match config_path(args, paths) {
        Some(path) => read_config(&path)?,
        None => {
            tracing::debug!("no config file found; using defaults");
            ProbeConfig::default()
        }
    };
    apply_overrides(&mut config, args);
    config
        .validate()
        .context("invalid configuration after applying command-line overrides")?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<ProbeConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = ProbeConfig::from_toml_str(&raw)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded probe configuration");
    Ok(config)
}

fn apply_overrides(config: &mut ProbeConfig, args: &RunArgs) {
    if let Some(source) = args.source {
        config.renderer.source = source;
    }
    if let Some(backend) = args.backend {
        config.renderer.backend = backend;
    }
    if let Some(sampler) = args.sampler {
        config.renderer.sampler = Some(sampler);
    }
    if let Some((width, height)) = args.size {
        config.surface.width = width;
        config.surface.height = height;
    }
    if let Some(frames) = args.frames {
        config.renderer.frames = Some(frames);
    }
    if let Some(mode) = args.render_mode {
        config.surface.render_mode = mode;
    }
    if args.threaded_producer {
        config.producer.threaded = true;
    }
}

/// Recording textures accept uploads on any target; real drivers reject
/// `glTexImage2D` on the external target.
fn resolve_sampler(config: &ProbeConfig) -> SamplerTarget {
    match (config.renderer.sampler, config.renderer.backend) {
        (Some(SamplerSetting::External), _) => SamplerTarget::External,
        (Some(SamplerSetting::Texture2d), _) => SamplerTarget::Texture2d,
        (None, BackendSetting::Egl) => SamplerTarget::Texture2d,
        (None, BackendSetting::Recording) => SamplerTarget::External,
    }
}

fn build_source(config: &ProbeConfig) -> Result<TextureSource> {
    match config.renderer.source {
        SourceSetting::Generated => Ok(TextureSource::GeneratedBitmap(BitmapOptions {
            width: config.bitmap.width,
            height: config.bitmap.height,
            text: config.bitmap.text.clone(),
        })),
        SourceSetting::Producer => {
            let producer = StripeProducer::with_size(config.producer.width, config.producer.height);
            if config.producer.threaded {
                let thread =
                    ProducerThread::spawn(producer).context("failed to start producer thread")?;
                Ok(TextureSource::producer(thread))
            } else {
                Ok(TextureSource::producer(producer))
            }
        }
    }
}

fn host_config(config: &ProbeConfig, capture: bool) -> HostConfig {
    let mut host = HostConfig::new(config.surface.width, config.surface.height);
    host.render_mode = match config.surface.render_mode {
        RenderModeSetting::Continuous => RenderMode::Continuously,
        RenderModeSetting::Dirty => RenderMode::WhenDirty,
    };
    if let Some(interval) = config.frame_interval() {
        host.frame_interval = interval;
    }
    host.max_frames = config.renderer.frames;
    host.run_for = config.run_for();
    host.capture_final_frame = capture;
    host
}

fn recording_context(config: &HostConfig) -> Result<Box<dyn RenderContext>> {
    Ok(Box::new(RecordingGles::new(config.width, config.height)))
}

fn run_probe(args: &RunArgs, paths: &AppPaths) -> Result<()> {
    let config = load_config(args, paths)?;
    let sampler = resolve_sampler(&config);
    let source = build_source(&config)?;
    let host = host_config(&config, args.export.is_some());
    tracing::info!(
        source = source.name(),
        %sampler,
        backend = ?config.renderer.backend,
        width = host.width,
        height = host.height,
        mode = %host.render_mode,
        "starting render probe"
    );

    let renderer = FrameRenderer::new(source, sampler);
    let run = match config.renderer.backend {
        BackendSetting::Recording => SurfaceHost::spawn(host, renderer, recording_context)?.wait(),
        #[cfg(feature = "egl")]
        BackendSetting::Egl => {
            SurfaceHost::spawn(host, renderer, texrender::HeadlessEgl::factory)?.wait()
        }
        #[cfg(not(feature = "egl"))]
        BackendSetting::Egl => anyhow::bail!("egl support is not enabled in this build"),
    }
    .context("render probe failed")?;

    if let Some(path) = &args.export {
        export_frame(&run, path)?;
    }

    let summary = RunSummary::new(&config, sampler, &run, args.export.as_deref());
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print();
    }
    Ok(())
}

fn export_frame(run: &HostRun<FrameRenderer>, path: &Path) -> Result<()> {
    let frame = run
        .report
        .final_frame
        .as_ref()
        .context("render thread did not capture a final frame")?;
    frame
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "exported final frame");
    Ok(())
}

#[derive(Debug, Serialize)]
struct RunSummary {
    backend: String,
    source: &'static str,
    sampler: String,
    render_mode: String,
    width: u32,
    height: u32,
    surfaces_created: u64,
    resizes: u64,
    render_requests: u64,
    frames_drawn: u64,
    frames_latched: u64,
    frames_dropped: u64,
    elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    export: Option<PathBuf>,
}

impl RunSummary {
    fn new(
        config: &ProbeConfig,
        sampler: SamplerTarget,
        run: &HostRun<FrameRenderer>,
        export: Option<&Path>,
    ) -> Self {
        let stats = run.renderer.stats();
        Self {
            backend: run.report.context.clone(),
            source: run.renderer.source().name(),
            sampler: sampler.to_string(),
            render_mode: match config.surface.render_mode {
                RenderModeSetting::Continuous => "continuous".to_string(),
                RenderModeSetting::Dirty => "dirty".to_string(),
            },
            width: config.surface.width,
            height: config.surface.height,
            surfaces_created: run.report.surfaces_created,
            resizes: run.report.resizes,
            render_requests: run.report.render_requests,
            frames_drawn: run.report.frames_drawn,
            frames_latched: stats.frames_latched,
            frames_dropped: stats.frames_dropped,
            elapsed_ms: run.report.elapsed.as_millis(),
            export: export.map(Path::to_path_buf),
        }
    }

    fn print(&self) {
        println!("backend          : {}", self.backend);
        println!("source           : {}", self.source);
        println!("sampler          : {}", self.sampler);
        println!("render mode      : {}", self.render_mode);
        println!("surface          : {}x{}", self.width, self.height);
        println!("surfaces created : {}", self.surfaces_created);
        println!("frames drawn     : {}", self.frames_drawn);
        println!(
            "frames latched   : {} ({} dropped)",
            self.frames_latched, self.frames_dropped
        );
        println!("render requests  : {}", self.render_requests);
        println!("elapsed          : {} ms", self.elapsed_ms);
        if let Some(path) = &self.export {
            println!("exported         : {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn overrides_replace_config_values() {
        let mut config = ProbeConfig::default();
        let args = RunArgs {
            source: Some(SourceSetting::Generated),
            size: Some((32, 16)),
            frames: Some(4),
            render_mode: Some(RenderModeSetting::Dirty),
            threaded_producer: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.renderer.source, SourceSetting::Generated);
        assert_eq!((config.surface.width, config.surface.height), (32, 16));
        assert_eq!(config.renderer.frames, Some(4));
        assert_eq!(config.surface.render_mode, RenderModeSetting::Dirty);
        assert!(config.producer.threaded);
        assert_eq!(config.renderer.backend, BackendSetting::Recording);
    }

    #[test]
    fn sampler_follows_backend_unless_set() {
        let mut config = ProbeConfig::default();
        assert_eq!(resolve_sampler(&config), SamplerTarget::External);
        config.renderer.backend = BackendSetting::Egl;
        assert_eq!(resolve_sampler(&config), SamplerTarget::Texture2d);
        config.renderer.sampler = Some(SamplerSetting::External);
        assert_eq!(resolve_sampler(&config), SamplerTarget::External);
    }

    #[test]
    fn host_config_carries_stop_conditions() {
        let mut config = ProbeConfig::default();
        config.renderer.frames = Some(7);
        config.surface.fps = Some(4.0);
        let host = host_config(&config, true);
        assert_eq!(host.max_frames, Some(7));
        assert_eq!(host.run_for, None);
        assert_eq!(host.frame_interval, Duration::from_millis(250));
        assert!(host.capture_final_frame);
        assert_eq!(host.render_mode, RenderMode::Continuously);
    }

    #[test]
    fn default_run_time_applies_without_frame_limit() {
        let host = host_config(&ProbeConfig::default(), false);
        assert_eq!(host.max_frames, None);
        assert_eq!(host.run_for, Some(probeconfig::DEFAULT_RUN_FOR));
    }

    #[test]
    fn frame_limit_outlasts_default_run_time() {
        let mut config = ProbeConfig::default();
        config.surface.width = 4;
        config.surface.height = 4;
        config.surface.fps = Some(50.0);
        config.producer.width = 4;
        config.producer.height = 4;
        let args = RunArgs {
            frames: Some(120),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);

        let renderer = FrameRenderer::new(build_source(&config).unwrap(), resolve_sampler(&config));
        let run = SurfaceHost::spawn(host_config(&config, false), renderer, recording_context)
            .unwrap()
            .wait()
            .unwrap();
        // 120 frames at 20ms apart take longer than the default two seconds.
        assert_eq!(run.report.frames_drawn, 120);
        assert!(run.report.elapsed > probeconfig::DEFAULT_RUN_FOR);
    }

    #[test]
    fn recording_probe_runs_to_the_frame_limit() {
        let mut config = ProbeConfig::default();
        config.surface.width = 16;
        config.surface.height = 16;
        config.producer.width = 16;
        config.producer.height = 16;
        config.renderer.frames = Some(3);

        let renderer = FrameRenderer::new(build_source(&config).unwrap(), resolve_sampler(&config));
        let run = SurfaceHost::spawn(host_config(&config, false), renderer, recording_context)
            .unwrap()
            .wait()
            .unwrap();
        let summary = RunSummary::new(&config, SamplerTarget::External, &run, None);
        assert_eq!(summary.frames_drawn, 3);
        assert_eq!(summary.source, "producer");
        assert_eq!(summary.backend, "recording");
    }
}
