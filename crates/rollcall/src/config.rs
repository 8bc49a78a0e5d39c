use rollcall_core::arbiter::DEFAULT_LATE_AFTER_SECS;
use rollcall_core::{default_roster, CheckInPolicy, SimilarityPolicy, Student};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Width enrollment snapshots are stored at.
pub const DEFAULT_ENROLL_WIDTH: u32 = 240;
/// Snapshot height when the camera reports no dimensions.
pub const FALLBACK_ENROLL_HEIGHT: u32 = 180;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("duplicate student id in roster: {0}")]
    DuplicateStudent(String),
}

/// Application configuration.
///
/// Built from defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables, each layer overriding the previous one.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// SQLite database holding enrolled face templates.
    pub db_path: PathBuf,
    /// Optional TOML roster; the built-in roster is used when unset.
    pub roster_path: Option<PathBuf>,
    /// Check-ins more than this many seconds after start are late.
    pub late_after_secs: i64,
    pub enroll_width: u32,
    pub similarity: SimilarityPolicy,
}

/// On-disk form of [`Config`]. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub camera_device: Option<String>,
    pub db_path: Option<PathBuf>,
    pub roster_path: Option<PathBuf>,
    pub late_after_secs: Option<i64>,
    pub liveness_threshold: Option<f64>,
    pub match_threshold: Option<f64>,
    pub liveness_samples: Option<usize>,
    pub liveness_interval_ms: Option<u64>,
    pub liveness_width: Option<u32>,
    pub match_size: Option<u32>,
    pub enroll_width: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            db_path: data_dir().join("rollcall.db"),
            roster_path: None,
            late_after_secs: DEFAULT_LATE_AFTER_SECS,
            enroll_width: DEFAULT_ENROLL_WIDTH,
            similarity: SimilarityPolicy::default(),
        }
    }
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let file = if path.exists() {
            Some(read_file_config(&path)?)
        } else {
            None
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    /// Layer a parsed file and an environment lookup over the defaults.
    pub fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(file) = file {
            let sim = &mut config.similarity;
            set(&mut config.camera_device, file.camera_device);
            set(&mut config.db_path, file.db_path);
            config.roster_path = file.roster_path.or(config.roster_path);
            set(&mut config.late_after_secs, file.late_after_secs);
            set(&mut sim.liveness_threshold, file.liveness_threshold);
            set(&mut sim.match_threshold, file.match_threshold);
            set(&mut sim.liveness_samples, file.liveness_samples);
            set(&mut sim.liveness_interval_ms, file.liveness_interval_ms);
            set(&mut sim.liveness_width, file.liveness_width);
            set(&mut sim.match_size, file.match_size);
            set(&mut config.enroll_width, file.enroll_width);
        }

        let sim = &mut config.similarity;
        set(&mut config.camera_device, env("ROLLCALL_CAMERA_DEVICE"));
        set(&mut config.db_path, env("ROLLCALL_DB_PATH").map(PathBuf::from));
        if let Some(roster) = env("ROLLCALL_ROSTER_PATH") {
            config.roster_path = Some(PathBuf::from(roster));
        }
        env_parse(&env, "ROLLCALL_LATE_AFTER_SECS", &mut config.late_after_secs);
        env_parse(&env, "ROLLCALL_LIVENESS_THRESHOLD", &mut sim.liveness_threshold);
        env_parse(&env, "ROLLCALL_MATCH_THRESHOLD", &mut sim.match_threshold);
        env_parse(&env, "ROLLCALL_LIVENESS_SAMPLES", &mut sim.liveness_samples);
        env_parse(&env, "ROLLCALL_LIVENESS_INTERVAL_MS", &mut sim.liveness_interval_ms);
        env_parse(&env, "ROLLCALL_LIVENESS_WIDTH", &mut sim.liveness_width);
        env_parse(&env, "ROLLCALL_MATCH_SIZE", &mut sim.match_size);
        env_parse(&env, "ROLLCALL_ENROLL_WIDTH", &mut config.enroll_width);

        config.sanitize();
        config
    }

    /// Reset out-of-range values to their defaults, warning for each.
    fn sanitize(&mut self) {
        let defaults = Self::default();
        let sim_defaults = SimilarityPolicy::default();
        let sim = &mut self.similarity;

        if self.late_after_secs < 0 || late_after(self.late_after_secs).is_none() {
            reject("late_after_secs", &mut self.late_after_secs, defaults.late_after_secs);
        }
        if self.enroll_width == 0 {
            reject("enroll_width", &mut self.enroll_width, defaults.enroll_width);
        }
        if sim.liveness_width == 0 {
            reject("liveness_width", &mut sim.liveness_width, sim_defaults.liveness_width);
        }
        if sim.match_size == 0 {
            reject("match_size", &mut sim.match_size, sim_defaults.match_size);
        }
        // Liveness compares consecutive frames, so it needs at least one pair.
        if sim.liveness_samples < 2 {
            reject(
                "liveness_samples",
                &mut sim.liveness_samples,
                sim_defaults.liveness_samples,
            );
        }
        if !sim.liveness_threshold.is_finite() {
            reject(
                "liveness_threshold",
                &mut sim.liveness_threshold,
                sim_defaults.liveness_threshold,
            );
        }
        if !sim.match_threshold.is_finite() {
            reject(
                "match_threshold",
                &mut sim.match_threshold,
                sim_defaults.match_threshold,
            );
        }
    }

    pub fn check_in_policy(&self) -> CheckInPolicy {
        let late_after = late_after(self.late_after_secs)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_LATE_AFTER_SECS));
        CheckInPolicy { late_after }
    }

    /// The configured roster, or the built-in one.
    pub fn roster(&self) -> Result<Vec<Student>, ConfigError> {
        match &self.roster_path {
            Some(path) => load_roster(path),
            None => Ok(default_roster()),
        }
    }
}

#[derive(Deserialize)]
struct RosterFile {
    students: Vec<Student>,
}

/// Read a roster file of `[[students]]` tables with `id` and `name`.
pub fn load_roster(path: &Path) -> Result<Vec<Student>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_roster(&text).map_err(|e| match e {
        RosterParse::Toml(source) => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        RosterParse::Duplicate(id) => ConfigError::DuplicateStudent(id),
    })
}

enum RosterParse {
    Toml(toml::de::Error),
    Duplicate(String),
}

fn parse_roster(text: &str) -> Result<Vec<Student>, RosterParse> {
    let file: RosterFile = toml::from_str(text).map_err(RosterParse::Toml)?;
    let mut seen = HashSet::new();
    for student in &file.students {
        if !seen.insert(student.id.as_str()) {
            return Err(RosterParse::Duplicate(student.id.clone()));
        }
    }
    Ok(file.students)
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `$ROLLCALL_CONFIG`, else `$XDG_CONFIG_HOME/rollcall/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall")
        .join("config.toml")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("rollcall")
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn late_after(secs: i64) -> Option<chrono::Duration> {
    chrono::Duration::try_seconds(secs)
}

fn reject<T: std::fmt::Debug>(key: &str, slot: &mut T, default: T) {
    tracing::warn!(key, value = ?slot, default = ?default, "out-of-range setting, using default");
    *slot = default;
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = env(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
