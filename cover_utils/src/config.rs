//! Image Configuration
//!
//! Immutable settings for one batch: target size, the optional AI upscaler,
//! the interpolation used for the final resize and the group selection policy.
//! Persisted as pretty-printed JSON; missing keys fall back to defaults so old
//! config files keep loading.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{CoverArtError, Result};
use crate::upscale::{fill_template, ExternalEngine};

pub const DEFAULT_TARGET_SIZE: u32 = 1024;
pub const DEFAULT_CONFIG_PATH: &str = "config/image.json";

/// How a batch with more than one image picks what to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// Transform every distinct image once.
    EachUnique,
    /// Transform only the most frequent image and attach it to every track.
    #[default]
    MostCommon,
}

impl GroupMode {
    pub fn label(self) -> &'static str {
        match self {
            GroupMode::EachUnique => "each unique",
            GroupMode::MostCommon => "most common",
        }
    }
}

/// Resampling used by the final resize. The order of [`Interpolation::METHODS`]
/// is fixed: fastest first, best quality last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Skip the resize stage entirely.
    None,
    #[default]
    Linear,
    Area,
    Lanczos,
}

impl Interpolation {
    pub const METHODS: [Interpolation; 3] = [
        Interpolation::Linear,
        Interpolation::Area,
        Interpolation::Lanczos,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Interpolation::None => "Disabled",
            Interpolation::Linear => "Fastest",
            Interpolation::Area => "Balanced",
            Interpolation::Lanczos => "Best Quality",
        }
    }

    pub fn filter(self) -> Option<FilterType> {
        match self {
            Interpolation::None => None,
            Interpolation::Linear => Some(FilterType::Triangle),
            // `image` has no box/area resampler; Catmull-Rom (bicubic) sits between the other two.
            Interpolation::Area => Some(FilterType::CatmullRom),
            Interpolation::Lanczos => Some(FilterType::Lanczos3),
        }
    }
}

/// One external AI upscaler.
///
/// `target` may contain `{root}`; `options` may contain `{root}`, `{input}`,
/// `{output}` and `{scale}`. Double quotes group an argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSpec {
    pub name: String,
    pub target: String,
    pub options: String,
}

impl EngineSpec {
    pub fn new(name: &str, target: &str, options: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            options: options.to_string(),
        }
    }

    pub fn executable(&self, root: &Path) -> PathBuf {
        let root = root.to_string_lossy();
        PathBuf::from(fill_template(&self.target, &[("root", root.as_ref())]))
    }

    /// A bare program name is looked up on `PATH`, anything else must exist.
    pub fn is_available(&self, root: &Path) -> bool {
        let exe = self.executable(root);
        if is_bare_program(&self.target) {
            return which::which(&exe).is_ok();
        }
        exe.is_file()
    }
}

fn is_bare_program(target: &str) -> bool {
    !target.contains("{root}") && !target.contains('/') && !target.contains('\\')
}

fn ncnn_engine(name: &str, dir: &str, models: &str) -> EngineSpec {
    EngineSpec::new(
        name,
        &format!("{{root}}/{dir}/{dir}{}", std::env::consts::EXE_SUFFIX),
        &format!(
            "-m \"{{root}}/{dir}/{models}\" -i \"{{input}}\" -o \"{{output}}\" -s {{scale}}"
        ),
    )
}

pub fn default_engines() -> Vec<EngineSpec> {
    vec![
        ncnn_engine("RealSR", "realsr-ncnn-vulkan", "models-DF2K"),
        ncnn_engine("Waifu2x", "waifu2x-ncnn-vulkan", "models-cunet"),
        ncnn_engine("SRMD", "srmd-ncnn-vulkan", "models-srmd"),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub image_size_target: u32,
    pub group_mode: GroupMode,
    pub interpolation: Interpolation,
    /// Name of the engine in `ai_engines`, `None` disables AI upscaling.
    pub ai_method: Option<String>,
    pub ai_directory: PathBuf,
    pub ai_engines: Vec<EngineSpec>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            image_size_target: DEFAULT_TARGET_SIZE,
            group_mode: GroupMode::default(),
            interpolation: Interpolation::default(),
            ai_method: None,
            ai_directory: PathBuf::from("ai"),
            ai_engines: default_engines(),
        }
    }
}

impl ImageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CoverArtError::io(path, e))?;
        let config: ImageConfig = serde_json::from_str(&text)
            .map_err(|e| CoverArtError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CoverArtError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CoverArtError::Config(e.to_string()))?;
        fs::write(path, text).map_err(|e| CoverArtError::io(path, e))
    }

    /// Load `path`, or write the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let config = Self::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "Created default image config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_size_target == 0 {
            return Err(CoverArtError::Config(
                "image_size_target must be a positive number of pixels".to_string(),
            ));
        }
        if let Some(name) = &self.ai_method {
            if self.engine(name).is_none() {
                return Err(CoverArtError::Config(format!(
                    "ai_method '{}' does not name a configured engine",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn engine(&self, name: &str) -> Option<&EngineSpec> {
        self.ai_engines.iter().find(|e| e.name == name)
    }

    /// Names of the engines whose executable can actually be found.
    pub fn valid_ai_models(&self) -> Vec<String> {
        self.ai_engines
            .iter()
            .filter(|e| e.is_available(&self.ai_directory))
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn interpolation_methods(&self) -> Vec<&'static str> {
        Interpolation::METHODS.iter().map(|m| m.label()).collect()
    }

    /// The external adapter for `ai_method`, or `None` when AI upscaling is off.
    pub fn resolve_upscaler(&self) -> Result<Option<ExternalEngine>> {
        let Some(name) = &self.ai_method else {
            return Ok(None);
        };
        let spec = self.engine(name).ok_or_else(|| {
            CoverArtError::Config(format!("ai_method '{}' does not name a configured engine", name))
        })?;
        Ok(Some(ExternalEngine::from_spec(spec, &self.ai_directory)))
    }
}
