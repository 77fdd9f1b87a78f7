//! Finding config files, layering them, and overlaying the environment.

use crate::{ConfigError, JamConfig, SeparationConfig};
use std::env;
use std::path::{Path, PathBuf};

/// What contributed to the effective config, for `jam config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files applied, first to last
    pub files: Vec<PathBuf>,
    /// Variables that replaced a file or default value
    pub env_overrides: Vec<String>,
}

/// Existing config files in the order they apply.
///
/// An existing `cli_path` takes the place of `./jamsession.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/jamsession/config.toml");
    if system.exists() {
        files.push(system);
    }

    // $XDG_CONFIG_HOME/jamsession, falling back to ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("jamsession/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("jamsession.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load a TOML file on top of `config`. Keys absent from the file keep their current value.
pub fn load_file_into(config: &mut JamConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay a TOML document onto `config`.
fn apply_toml(config: &mut JamConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("download_dir").and_then(|v| v.as_str()) {
            config.paths.download_dir = expand_path(v);
        }
        if let Some(v) = paths.get("separated_dir").and_then(|v| v.as_str()) {
            config.paths.separated_dir = expand_path(v);
        }
    }

    if let Some(session) = table.get("session").and_then(|v| v.as_table()) {
        if let Some(v) = session.get("api_key").and_then(|v| v.as_str()) {
            config.session.api_key = Some(v.to_string());
        }
        if let Some(v) = session.get("endpoint").and_then(|v| v.as_str()) {
            config.session.endpoint = v.to_string();
        }
        if let Some(v) = session.get("model").and_then(|v| v.as_str()) {
            config.session.model = v.to_string();
        }
        if let Some(v) = session.get("buffer_ms").and_then(|v| v.as_integer()) {
            config.session.buffer_ms = unsigned(v, "session.buffer_ms", path)?;
        }
        if let Some(v) = session.get("warmup_ms").and_then(|v| v.as_integer()) {
            config.session.warmup_ms = unsigned(v, "session.warmup_ms", path)?;
        }
        if let Some(v) = session.get("max_play_secs").and_then(|v| v.as_integer()) {
            config.session.max_play_secs = unsigned(v, "session.max_play_secs", path)?;
        }
        if let Some(v) = session.get("setup_timeout_ms").and_then(|v| v.as_integer()) {
            config.session.setup_timeout_ms = unsigned(v, "session.setup_timeout_ms", path)?;
        }
    }

    if let Some(audio) = table.get("audio").and_then(|v| v.as_table()) {
        if let Some(v) = audio.get("sample_rate").and_then(|v| v.as_integer()) {
            config.audio.sample_rate = unsigned(v, "audio.sample_rate", path)?;
        }
        if let Some(v) = audio.get("channels").and_then(|v| v.as_integer()) {
            config.audio.channels = unsigned(v, "audio.channels", path)?;
        }
        if let Some(v) = audio.get("frame_size").and_then(|v| v.as_integer()) {
            config.audio.frame_size = unsigned(v, "audio.frame_size", path)?;
        }
        if let Some(v) = audio.get("playback").and_then(|v| v.as_bool()) {
            config.audio.playback = v;
        }
    }

    if let Some(separation) = table.get("separation").and_then(|v| v.as_table()) {
        if let Some(v) = separation.get("enabled").and_then(|v| v.as_bool()) {
            config.separation.enabled = v;
        }
        if let Some(v) = separation.get("interpreter").and_then(|v| v.as_str()) {
            config.separation.interpreter = expand_path(v);
        }
        if let Some(v) = separation.get("script").and_then(|v| v.as_str()) {
            config.separation.script = expand_path(v);
        }
        if let Some(v) = separation.get("model").and_then(|v| v.as_str()) {
            config.separation.model = v.to_string();
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

fn unsigned<T: TryFrom<i64>>(value: i64, key: &str, path: &Path) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} is out of range (got {})", key, value),
    })
}

/// Overlay the process environment.
pub fn apply_env_overrides(config: &mut JamConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Environment overlay with an injectable lookup, so tests don't touch the process env.
pub(crate) fn apply_overrides_from(
    config: &mut JamConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    // API key: the generic Google variable first, the namespaced one wins
    if let Some(v) = lookup("GOOGLE_API_KEY") {
        config.session.api_key = Some(v);
        sources.env_overrides.push("GOOGLE_API_KEY".to_string());
    }
    if let Some(v) = lookup("JAMSESSION_API_KEY") {
        config.session.api_key = Some(v);
        sources.env_overrides.push("JAMSESSION_API_KEY".to_string());
    }

    if let Some(v) = lookup("JAMSESSION_ENDPOINT") {
        config.session.endpoint = v;
        sources.env_overrides.push("JAMSESSION_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("JAMSESSION_MODEL") {
        config.session.model = v;
        sources.env_overrides.push("JAMSESSION_MODEL".to_string());
    }
    if let Some(v) = lookup("JAMSESSION_MAX_PLAY_SECS") {
        if let Ok(secs) = v.parse() {
            config.session.max_play_secs = secs;
            sources.env_overrides.push("JAMSESSION_MAX_PLAY_SECS".to_string());
        }
    }

    if let Some(v) = lookup("JAMSESSION_DOWNLOAD_DIR") {
        config.paths.download_dir = expand_path(&v);
        sources.env_overrides.push("JAMSESSION_DOWNLOAD_DIR".to_string());
    }
    if let Some(v) = lookup("JAMSESSION_SEPARATED_DIR") {
        config.paths.separated_dir = expand_path(&v);
        sources.env_overrides.push("JAMSESSION_SEPARATED_DIR".to_string());
    }

    // Separation interpreter: USEVENV=true selects ./venv, an explicit path wins over both
    if let Some(v) = lookup("USEVENV") {
        config.separation.interpreter = if v == "true" {
            SeparationConfig::venv_interpreter()
        } else {
            SeparationConfig::default_interpreter()
        };
        sources.env_overrides.push("USEVENV".to_string());
    }
    if let Some(v) = lookup("JAMSESSION_PYTHON") {
        config.separation.interpreter = expand_path(&v);
        sources.env_overrides.push("JAMSESSION_PYTHON".to_string());
    }

    if let Some(v) = lookup("JAMSESSION_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("JAMSESSION_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// `~/rest` and `$VAR/rest` expansion. Unknown variables are left as written.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}
