use crate::color::{ColorGradient, ColorMode};
use crate::error::SettingsError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Deepest octree level a configuration may ask for. Bisecting further
/// only separates exact duplicates, which never helps a query.
pub const MAX_OCTREE_DEPTH: usize = 32;

/// Read-only tunables shared by storage, parsing and spatial indexing.
///
/// A snapshot is taken when a cloud, parser or import job is constructed;
/// later edits to the source document do not affect running work.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Elements per [`ChunkedArray`](crate::ChunkedArray) segment.
    pub chunk_capacity: usize,
    /// Vertices per parser callback chunk.
    pub batch_vertices_limit: usize,
    /// Size of the raw read buffer used for binary bodies.
    pub read_buffer_bytes: usize,
    pub octree_max_points_per_node: usize,
    pub octree_max_depth: usize,
    /// Upper bound on points handed to rendering after density sampling.
    pub max_points_sampled: usize,
    pub progress_interval_ms: u64,
    pub invalidation_interval_ms: u64,
    pub default_point_size: u8,
    pub default_density: f64,
    pub default_color_mode: ColorMode,
    pub default_color_gradient: ColorGradient,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_capacity: 65_536,
            batch_vertices_limit: 100_000,
            read_buffer_bytes: 256 * 1024,
            octree_max_points_per_node: 64,
            octree_max_depth: 12,
            max_points_sampled: 2_000_000,
            progress_interval_ms: 200,
            invalidation_interval_ms: 100,
            default_point_size: 2,
            default_density: 1.0,
            default_color_mode: ColorMode::Original,
            default_color_gradient: ColorGradient::Rainbow,
        }
    }
}

impl Settings {
    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let positive = [
            ("chunk_capacity", self.chunk_capacity),
            ("batch_vertices_limit", self.batch_vertices_limit),
            ("read_buffer_bytes", self.read_buffer_bytes),
            ("octree_max_points_per_node", self.octree_max_points_per_node),
            ("max_points_sampled", self.max_points_sampled),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.octree_max_depth > MAX_OCTREE_DEPTH {
            return Err(SettingsError::Invalid {
                field: "octree_max_depth",
                reason: format!("{} exceeds {}", self.octree_max_depth, MAX_OCTREE_DEPTH),
            });
        }

        if !(1..=10).contains(&self.default_point_size) {
            return Err(SettingsError::Invalid {
                field: "default_point_size",
                reason: format!("{} is outside 1..=10", self.default_point_size),
            });
        }

        if !(0.01..=1.0).contains(&self.default_density) {
            return Err(SettingsError::Invalid {
                field: "default_density",
                reason: format!("{} is outside 0.01..=1.0", self.default_density),
            });
        }

        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn invalidation_interval(&self) -> Duration {
        Duration::from_millis(self.invalidation_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use crate::color::{ColorGradient, ColorMode};
    use crate::error::SettingsError;
    use std::io::Write as _;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s = Settings::from_json_str(r#"{ "chunk_capacity": 16, "octree_max_depth": 4 }"#).unwrap();
        assert_eq!(s.chunk_capacity, 16);
        assert_eq!(s.octree_max_depth, 4);
        assert_eq!(s.batch_vertices_limit, Settings::default().batch_vertices_limit);
    }

    #[test]
    fn color_defaults_parse_snake_case() {
        let s = Settings::from_json_str(
            r#"{ "default_color_mode": "height", "default_color_gradient": "viridis" }"#,
        )
        .unwrap();
        assert_eq!(s.default_color_mode, ColorMode::Height);
        assert_eq!(s.default_color_gradient, ColorGradient::Viridis);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = Settings::from_json_str(r#"{ "chunk_capacity": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "chunk_capacity",
                ..
            }
        ));
    }

    #[test]
    fn octree_depth_is_capped() {
        let err = Settings::from_json_str(
            r#"{ "octree_max_depth": 1000000, "octree_max_points_per_node": 1 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "octree_max_depth", .. }));

        let deepest = format!(r#"{{ "octree_max_depth": {} }}"#, super::MAX_OCTREE_DEPTH);
        assert!(Settings::from_json_str(&deepest).is_ok());
    }

    #[test]
    fn density_out_of_range_is_rejected() {
        let err = Settings::from_json_str(r#"{ "default_density": 2.0 }"#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "default_density", .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Settings::from_json_str("{ chunk_capacity: ").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, r#"{{ "progress_interval_ms": 50 }}"#).unwrap();
        let s = Settings::from_path(tmp.path()).unwrap();
        assert_eq!(s.progress_interval().as_millis(), 50);
    }
}
