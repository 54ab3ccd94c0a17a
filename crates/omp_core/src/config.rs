use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "omp.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub portal: PortalConfig,
    pub fetch: FetchConfig,
    pub extract: ExtractConfig,
    pub store: StoreConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub base_url: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://opengov.sos.ri.gov".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_tries: u32,
    pub wait_secs: f64,
    pub request_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            wait_secs: 10.0,
            request_timeout_secs: 60,
        }
    }
}

impl FetchConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(self.wait_secs.max(0.0))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Empty disables text extraction; documents are stored without snippets.
    pub tika_endpoint: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tika_endpoint: "http://127.0.0.1:9998/tika".to_string(),
        }
    }
}

impl ExtractConfig {
    pub fn endpoint(&self) -> Option<&str> {
        let endpoint = self.tika_endpoint.trim();
        (!endpoint.is_empty()).then_some(endpoint)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/omp.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub workers: usize,
    pub batch_timeout_secs: Option<u64>,
    pub data_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 64,
            batch_timeout_secs: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl RunConfig {
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|err| Error::Config(err.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {err}", path.display())))?;
        Self::from_toml(&text)
    }

    /// An explicit path must exist. Without one, `omp.toml` in the working
    /// directory is used when present, otherwise every default applies.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::load_from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.fetch.max_tries == 0 {
            return Err(Error::Config("fetch.max_tries must be at least 1".into()));
        }
        if self.run.workers == 0 {
            return Err(Error::Config("run.workers must be at least 1".into()));
        }
        if !self.fetch.wait_secs.is_finite() || self.fetch.wait_secs < 0.0 {
            return Err(Error::Config("fetch.wait_secs must be a non-negative number".into()));
        }
        Ok(())
    }
}
