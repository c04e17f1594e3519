use std::{
    collections::HashMap,
    env, fs,
    path::PathBuf,
};

use directories::BaseDirs;
use tracing::debug;

const SECTION: &str = "idlrun";

/// Keys recognised in the rc file, with the environment variable that
/// overrides each.
const KEYS: &[(&str, &str)] = &[
    ("ssw_home", "IDLRUN_SSW_HOME"),
    ("idl_home", "IDLRUN_IDL_HOME"),
    ("work_dir", "IDLRUN_WORK_DIR"),
];

/// Installation defaults from `~/.idlrun/idlrunrc` and the environment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let text = if config_path.exists() {
            fs::read_to_string(&config_path).unwrap_or_default()
        } else {
            String::new()
        };
        let mut config = Self::parse(&text, config_path);

        // Overlay environment variables (take precedence)
        for (key, var) in KEYS {
            if let Ok(v) = env::var(var) {
                if !v.trim().is_empty() {
                    config.inner.insert(key.to_string(), v.trim().to_string());
                }
            }
        }
        debug!("configuration from {}: {:?}", config.config_path.display(), config.inner);
        config
    }

    /// Parse rc file text; keys outside the `[idlrun]` section are ignored
    /// unless they come before any section header.
    pub fn parse(text: &str, config_path: PathBuf) -> Self {
        let mut inner = HashMap::new();
        let mut in_section = true;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_section = name.trim().eq_ignore_ascii_case(SECTION);
                continue;
            }
            if !in_section {
                continue;
            }
            let pair = line.split_once('=').or_else(|| line.split_once(':'));
            if let Some((k, v)) = pair {
                let (k, v) = (k.trim().to_lowercase(), v.trim());
                if KEYS.iter().any(|(key, _)| *key == k) && !v.is_empty() {
                    inner.insert(k, v.to_string());
                }
            }
        }
        Self { inner, config_path }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(expand_home)
    }

    pub fn ssw_home(&self) -> Option<PathBuf> {
        self.get_path("ssw_home")
    }

    pub fn idl_home(&self) -> Option<PathBuf> {
        self.get_path("idl_home")
    }

    pub fn work_dir(&self) -> Option<PathBuf> {
        self.get_path("work_dir")
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(value)
}

fn default_config_path() -> PathBuf {
    let home = BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~"));
    home.join(".idlrun").join("idlrunrc")
}

/// Display helper for `--show-config`.
pub fn describe(config: &Config) -> Vec<(&'static str, Option<String>)> {
    KEYS.iter()
        .map(|(key, _)| (*key, config.get_path(key).map(|p| p.display().to_string())))
        .collect()
}
