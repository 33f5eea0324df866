use std::path::PathBuf;

use clap::{Parser, Subcommand};
use probeconfig::{BackendSetting, RenderModeSetting, SamplerSetting, SourceSetting};

#[derive(Parser, Debug)]
#[command(
    name = "texprobe",
    author,
    version,
    about = "Headless GL ES stream-texture render probe"
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Probe configuration file; defaults to `texprobe.toml` in the user config dir.
    #[arg(long, value_name = "FILE", env = "TEXPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Texture source: `producer` (stripe frames) or `generated` (gradient bitmap).
    #[arg(long, value_name = "SOURCE", value_parser = parse_source)]
    pub source: Option<SourceSetting>,

    /// GL backend: `egl` (headless pbuffer) or `recording` (in-process).
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendSetting>,

    /// Sampler used by the fragment shader: `external` or `2d`.
    #[arg(long, value_name = "SAMPLER", value_parser = parse_sampler)]
    pub sampler: Option<SamplerSetting>,

    /// Surface size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Stop after this many drawn frames.
    #[arg(long, value_name = "N", value_parser = parse_frames)]
    pub frames: Option<u64>,

    /// `continuous` draws every interval; `dirty` draws only on request.
    #[arg(long, value_name = "MODE", value_parser = parse_render_mode)]
    pub render_mode: Option<RenderModeSetting>,

    /// Run the stripe producer on its own thread.
    #[arg(long)]
    pub threaded_producer: bool,

    /// Write the last drawn frame to this PNG file.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Print the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect configuration lookup.
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved config directory and file.
    Where,
    /// Print the effective configuration as TOML.
    Show,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn normalise(value: &str, what: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{what} must not be empty"));
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn parse_source(value: &str) -> Result<SourceSetting, String> {
    match normalise(value, "source")?.as_str() {
        "producer" | "external" => Ok(SourceSetting::Producer),
        "generated" | "bitmap" => Ok(SourceSetting::Generated),
        other => Err(format!(
            "unknown source '{other}'; expected producer or generated"
        )),
    }
}

pub fn parse_backend(value: &str) -> Result<BackendSetting, String> {
    match normalise(value, "backend")?.as_str() {
        "egl" => {
            if cfg!(feature = "egl") {
                Ok(BackendSetting::Egl)
            } else {
                Err("egl support is not enabled in this build".to_string())
            }
        }
        "recording" | "soft" => Ok(BackendSetting::Recording),
        other => Err(format!(
            "unknown backend '{other}'; expected egl or recording"
        )),
    }
}

pub fn parse_sampler(value: &str) -> Result<SamplerSetting, String> {
    match normalise(value, "sampler")?.as_str() {
        "external" | "oes" => Ok(SamplerSetting::External),
        "2d" | "texture2d" => Ok(SamplerSetting::Texture2d),
        other => Err(format!("unknown sampler '{other}'; expected external or 2d")),
    }
}

pub fn parse_render_mode(value: &str) -> Result<RenderModeSetting, String> {
    match normalise(value, "render mode")?.as_str() {
        "continuous" | "continuously" => Ok(RenderModeSetting::Continuous),
        "dirty" | "when-dirty" => Ok(RenderModeSetting::Dirty),
        other => Err(format!(
            "unknown render mode '{other}'; expected continuous or dirty"
        )),
    }
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    probeconfig::parse_size(value).map_err(|err| err.to_string())
}

pub fn parse_frames(value: &str) -> Result<u64, String> {
    let frames: u64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid frame count '{value}'"))?;
    if frames == 0 {
        return Err("frame count must be greater than zero".to_string());
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_run_line() {
        let cli = Cli::try_parse_from([
            "texprobe",
            "--source",
            "generated",
            "--backend",
            "recording",
            "--sampler",
            "2d",
            "--size",
            "320x200",
            "--frames",
            "3",
            "--render-mode",
            "dirty",
            "--threaded-producer",
            "--json",
        ])
        .unwrap();
        let run = cli.run;
        assert_eq!(run.source, Some(SourceSetting::Generated));
        assert_eq!(run.backend, Some(BackendSetting::Recording));
        assert_eq!(run.sampler, Some(SamplerSetting::Texture2d));
        assert_eq!(run.size, Some((320, 200)));
        assert_eq!(run.frames, Some(3));
        assert_eq!(run.render_mode, Some(RenderModeSetting::Dirty));
        assert!(run.threaded_producer);
        assert!(run.json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_config_where() {
        let cli = Cli::try_parse_from(["texprobe", "config", "where"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand {
                action: ConfigAction::Where
            }))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_source("camera").is_err());
        assert!(parse_sampler("").is_err());
        assert!(parse_render_mode("sometimes").is_err());
        assert!(parse_frames("0").is_err());
        assert!(parse_size("12").is_err());
        assert!(Cli::try_parse_from(["texprobe", "--frames", "many"]).is_err());
    }

    #[test]
    fn values_are_case_insensitive() {
        assert_eq!(parse_source(" Producer ").unwrap(), SourceSetting::Producer);
        assert_eq!(parse_backend("RECORDING").unwrap(), BackendSetting::Recording);
        assert_eq!(parse_render_mode("When-Dirty").unwrap(), RenderModeSetting::Dirty);
    }
}
