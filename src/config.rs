use std::fs;
use std::path::Path;

use serde::Deserialize;
use strata_clipmap::{ClipmapConfig, ClipmapError};
use strata_residency::ResidencyConfig;
use strata_runtime::{PipelineConfig, PipelineError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("residency: {0}")]
    Residency(#[from] strata_residency::ConfigError),
    #[error("clipmap: {0}")]
    Clipmap(#[from] ClipmapError),
    #[error("pipeline: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("sim: {0}")]
    Sim(&'static str),
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub residency: ResidencyConfig,
    #[serde(default)]
    pub clipmap: ClipmapConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub terrain: TerrainConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TerrainConfig {
    #[serde(default = "default_seed")]
    pub seed: i32,
    #[serde(default = "default_height_frequency")]
    pub height_frequency: f32,
    #[serde(default = "default_base_height")]
    pub base_height: f32,
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
}

fn default_seed() -> i32 {
    1337
}
fn default_height_frequency() -> f32 {
    0.004
}
fn default_base_height() -> f32 {
    48.0
}
fn default_amplitude() -> f32 {
    32.0
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            height_frequency: default_height_frequency(),
            base_height: default_base_height(),
            amplitude: default_amplitude(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct SimConfig {
    /// World cells per chunk edge.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i32,
    /// Chebyshev chunk radius kept in the Near field.
    #[serde(default = "default_near_radius")]
    pub near_radius: i32,
    /// Chebyshev chunk radius kept in the Far field.
    #[serde(default = "default_far_radius")]
    pub far_radius: i32,
    /// World cells the viewer travels per frame.
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Synthetic feedback requests per visible chunk per frame.
    #[serde(default = "default_requests_per_chunk")]
    pub requests_per_chunk: u32,
    #[serde(default = "default_report_every")]
    pub report_every: u32,
}

fn default_chunk_size() -> i32 {
    32
}
fn default_near_radius() -> i32 {
    1
}
fn default_far_radius() -> i32 {
    3
}
fn default_speed() -> f32 {
    2.5
}
fn default_requests_per_chunk() -> u32 {
    4
}
fn default_report_every() -> u32 {
    60
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            near_radius: default_near_radius(),
            far_radius: default_far_radius(),
            speed: default_speed(),
            requests_per_chunk: default_requests_per_chunk(),
            report_every: default_report_every(),
        }
    }
}

impl StrataConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.residency.validate()?;
        self.clipmap.validate()?;
        self.pipeline.validate()?;
        if self.pipeline.region_cells != self.clipmap.region_size {
            return Err(ConfigError::Sim("pipeline.region_cells must equal clipmap.region_size"));
        }
        if self.sim.chunk_size <= 0 {
            return Err(ConfigError::Sim("chunk_size must be positive"));
        }
        if self.sim.near_radius < 0 || self.sim.far_radius < self.sim.near_radius {
            return Err(ConfigError::Sim("radii must satisfy 0 <= near_radius <= far_radius"));
        }
        Ok(())
    }
}

pub fn load_config_from_path(path: &Path) -> Result<StrataConfig, ConfigError> {
    let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let cfg = parse_config(&s).map_err(|e| match e {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })?;
    Ok(cfg)
}

pub fn parse_config(s: &str) -> Result<StrataConfig, ConfigError> {
    let cfg: StrataConfig = toml::from_str(s).map_err(|source| ConfigError::Parse {
        path: "<inline>".to_string(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.sim, SimConfig::default());
        assert_eq!(cfg.clipmap, ClipmapConfig::default());
        assert_eq!(cfg.residency.feedback.max_new_allocations, 32);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = parse_config(
            r#"
            [residency.near]
            tiles_x = 8
            tiles_y = 4

            [residency.feedback]
            max_recaptures_per_frame = 5

            [clipmap]
            resolution = 32

            [terrain]
            seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.residency.near.capacity(), 32);
        assert_eq!(cfg.residency.far.capacity(), 256);
        assert_eq!(cfg.residency.feedback.max_recaptures_per_frame, 5);
        assert_eq!(cfg.residency.feedback.max_requests_to_process, 256);
        assert_eq!(cfg.clipmap.resolution, 32);
        assert_eq!(cfg.clipmap.levels, 4);
        assert_eq!(cfg.terrain.seed, 7);
        assert_eq!(cfg.terrain.amplitude, 32.0);
    }

    #[test]
    fn invalid_values_fail_validation() {
        assert!(matches!(
            parse_config("[clipmap]\nresolution = 48\n"),
            Err(ConfigError::Clipmap(ClipmapError::Resolution(48)))
        ));
        assert!(matches!(
            parse_config("[residency.virtual_space]\nchunk_slots = 0\n"),
            Err(ConfigError::Residency(_))
        ));
        assert!(matches!(
            parse_config("[sim]\nnear_radius = 4\nfar_radius = 2\n"),
            Err(ConfigError::Sim(_))
        ));
        assert!(matches!(
            parse_config("[pipeline]\nmax_in_flight = 0\n"),
            Err(ConfigError::Pipeline(_))
        ));
        assert!(matches!(parse_config("[sim\n"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config_from_path(Path::new("/nonexistent/strata.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
