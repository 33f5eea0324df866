use std::fmt;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Time limit applied when a config bounds the run neither by time nor by
/// frame count.
pub const DEFAULT_RUN_FOR: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderModeSetting {
    #[default]
    Continuous,
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSetting {
    #[default]
    Producer,
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SamplerSetting {
    #[serde(rename = "external")]
    External,
    #[serde(rename = "2d")]
    Texture2d,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSetting {
    Egl,
    #[default]
    Recording,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProbeConfig {
    pub version: u32,
    #[serde(default)]
    pub surface: SurfaceSection,
    #[serde(default)]
    pub renderer: RendererSection,
    #[serde(default)]
    pub producer: ProducerSection,
    #[serde(default)]
    pub bitmap: BitmapSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SurfaceSection {
    #[serde(default = "default_surface_width")]
    pub width: u32,
    #[serde(default = "default_surface_height")]
    pub height: u32,
    #[serde(default)]
    pub render_mode: RenderModeSetting,
    #[serde(
        default,
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_for: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RendererSection {
    #[serde(default)]
    pub source: SourceSetting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<SamplerSetting>,
    #[serde(default)]
    pub backend: BackendSetting,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProducerSection {
    #[serde(default = "default_producer_width")]
    pub width: u32,
    #[serde(default = "default_producer_height")]
    pub height: u32,
    #[serde(default)]
    pub threaded: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BitmapSection {
    #[serde(default = "default_bitmap_size")]
    pub width: u32,
    #[serde(default = "default_bitmap_size")]
    pub height: u32,
    #[serde(default = "default_bitmap_text")]
    pub text: String,
}

fn default_surface_width() -> u32 {
    640
}

fn default_surface_height() -> u32 {
    480
}

fn default_producer_width() -> u32 {
    640
}

fn default_producer_height() -> u32 {
    480
}

fn default_bitmap_size() -> u32 {
    256
}

fn default_bitmap_text() -> String {
    "GL TEST".to_string()
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            version: 1,
            surface: SurfaceSection::default(),
            renderer: RendererSection::default(),
            producer: ProducerSection::default(),
            bitmap: BitmapSection::default(),
        }
    }
}

impl Default for SurfaceSection {
    fn default() -> Self {
        Self {
            width: default_surface_width(),
            height: default_surface_height(),
            render_mode: RenderModeSetting::default(),
            run_for: None,
            fps: None,
        }
    }
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            width: default_producer_width(),
            height: default_producer_height(),
            threaded: false,
        }
    }
}

impl Default for BitmapSection {
    fn default() -> Self {
        Self {
            width: default_bitmap_size(),
            height: default_bitmap_size(),
            text: default_bitmap_text(),
        }
    }
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
        None => serializer.serialize_none(),
    }
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() || v.is_infinite() {
                return Err(E::custom("duration must be a finite non-negative number"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

/// Parses `WIDTHxHEIGHT`, e.g. `1280x720`.
pub fn parse_size(raw: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid size '{raw}'; expected WIDTHxHEIGHT"));
    let (width, height) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(invalid)?;
    let width = width.trim().parse::<u32>().map_err(|_| invalid())?;
    let height = height.trim().parse::<u32>().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

impl ProbeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: ProbeConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Spacing between continuous-mode draws, if a rate was configured.
    pub fn frame_interval(&self) -> Option<Duration> {
        self.surface
            .fps
            .filter(|fps| *fps > 0.0)
            .and_then(|fps| Duration::try_from_secs_f32(1.0 / fps).ok())
    }

    /// Time limit for a run. Falls back to [`DEFAULT_RUN_FOR`] only when
    /// neither `surface.run_for` nor `renderer.frames` bounds the run.
    pub fn run_for(&self) -> Option<Duration> {
        match (self.surface.run_for, self.renderer.frames) {
            (Some(run_for), _) => Some(run_for),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_RUN_FOR),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        validate_size("surface", self.surface.width, self.surface.height)?;
        validate_size("producer", self.producer.width, self.producer.height)?;
        validate_size("bitmap", self.bitmap.width, self.bitmap.height)?;

        if self.producer.width % 4 != 0 {
            return Err(ConfigError::Invalid(format!(
                "producer width {} must be a multiple of 4",
                self.producer.width
            )));
        }

        if let Some(run_for) = self.surface.run_for {
            if run_for.is_zero() {
                return Err(ConfigError::Invalid(
                    "surface.run_for must be greater than zero".into(),
                ));
            }
        }

        if let Some(fps) = self.surface.fps {
            if !fps.is_finite() || fps < 0.0 {
                return Err(ConfigError::Invalid("surface.fps must be >= 0".into()));
            }
            if fps > 0.0 && Duration::try_from_secs_f32(1.0 / fps).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "surface.fps {fps} is too small for a frame interval"
                )));
            }
        }

        if self.renderer.frames == Some(0) {
            return Err(ConfigError::Invalid(
                "renderer.frames must be greater than zero".into(),
            ));
        }

        if self.bitmap.text.chars().count() > 64 {
            return Err(ConfigError::Invalid(
                "bitmap.text must be at most 64 characters".into(),
            ));
        }

        Ok(())
    }
}

fn validate_size(section: &str, width: u32, height: u32) -> Result<(), ConfigError> {
    if width == 0 || height == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section} size {width}x{height} must be non-zero"
        )));
    }
    Ok(())
}
