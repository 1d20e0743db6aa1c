//! JSON configuration for a site-alignment session.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::apriltag::{DetectError, Dictionary};
use crate::core::ModelTransform;
use crate::pipeline::PipelineParams;
use crate::tracking::{
    MarkerFile, MarkerSetError, MatcherParams, ModeledMarkers, WorkerTrackerParams,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error("no dictionary_path configured")]
    MissingDictionary,
    #[error(transparent)]
    Dictionary(#[from] DetectError),
    #[error(transparent)]
    Markers(#[from] MarkerSetError),
}

/// Everything needed to run detection and alignment on one site.
///
/// Relative paths are resolved against the directory of the config file by
/// [`SiteAlignConfig::load_json`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteAlignConfig {
    /// Physical side of a tag's black border, in metres.
    pub tag_size: f64,
    /// Vertical field of view of the AR camera, in degrees.
    pub fov_deg: f64,
    pub pipeline: PipelineParams,
    pub matcher: MatcherParams,
    pub worker: WorkerTrackerParams,
    /// Authored placement of the model root before alignment.
    pub model_origin: ModelTransform,
    /// Tag family JSON (`name`, `marker_size`, `max_correction_bits`, `codes`).
    pub dictionary_path: Option<PathBuf>,
    /// Surveyed marker file, `{"markers": [...]}`.
    pub markers_path: Option<PathBuf>,
}

impl Default for SiteAlignConfig {
    fn default() -> Self {
        Self {
            tag_size: 0.1,
            fov_deg: 60.0,
            pipeline: PipelineParams::default(),
            matcher: MatcherParams::default(),
            worker: WorkerTrackerParams::default(),
            model_origin: ModelTransform::identity(),
            dictionary_path: None,
            markers_path: None,
        }
    }
}

impl SiteAlignConfig {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config: Self = read_json(path)?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Make relative `dictionary_path` / `markers_path` relative to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for p in [&mut self.dictionary_path, &mut self.markers_path]
            .into_iter()
            .flatten()
        {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }

    /// Vertical field of view in radians.
    pub fn fov(&self) -> f64 {
        self.fov_deg.to_radians()
    }

    pub fn load_dictionary(&self) -> Result<Dictionary, ConfigError> {
        let path = self
            .dictionary_path
            .as_deref()
            .ok_or(ConfigError::MissingDictionary)?;
        let dict: Dictionary = read_json(path)?;
        dict.validate()?;
        Ok(dict)
    }

    /// The surveyed markers, or an empty set when no file is configured.
    pub fn load_markers(&self) -> Result<ModeledMarkers, ConfigError> {
        match self.markers_path.as_deref() {
            Some(path) => {
                let file: MarkerFile = read_json(path)?;
                Ok(ModeledMarkers::from_records(&file.markers)?)
            }
            None => Ok(ModeledMarkers::default()),
        }
    }
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
