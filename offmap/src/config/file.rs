use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use offmap_mbtiles::{CopyDuplicateMode, DEFAULT_PAGE_SIZE, TileErrorPolicy};
use serde::{Deserialize, Serialize};
use subst::VariableMap;
use tracing::{info, warn};

use crate::fonts::FontStore;
use crate::sources::Tilesets;
use crate::tasks::{JobSettings, TaskTracker};
use crate::{OffmapError, OffmapResult};

pub const KEEP_ALIVE_DEFAULT: u64 = 75;
pub const LISTEN_ADDRESSES_DEFAULT: &str = "0.0.0.0:3000";
pub const DATA_PATH_DEFAULT: &str = "data";

pub type UnrecognizedValues = HashMap<String, serde_yaml::Value>;
pub type UnrecognizedKeys = HashSet<String>;

pub type ConfigFileResult<T> = Result<T, ConfigFileError>;

#[derive(thiserror::Error, Debug)]
pub enum ConfigFileError {
    #[error("Unable to load config file {1}: {0}")]
    ConfigLoadError(#[source] std::io::Error, PathBuf),

    #[error("Unable to parse config file {1}: {0}")]
    ConfigParseError(#[source] subst::yaml::Error, PathBuf),

    #[error("Unable to serialize the configuration: {0}")]
    ConfigSerializeError(#[source] serde_yaml::Error),

    #[error("Unable to write config file {1}: {0}")]
    ConfigWriteError(#[source] std::io::Error, PathBuf),

    #[error("tasks.{0} must be greater than zero")]
    ZeroValue(&'static str),
}

/// Everything the HTTP handlers share
#[derive(Clone, Debug)]
pub struct ServerState {
    pub tilesets: Tilesets,
    pub fonts: FontStore,
    pub tasks: TaskTracker,
}

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct SrvConfig {
    pub keep_alive: Option<u64>,
    pub listen_addresses: Option<String>,
    pub worker_processes: Option<usize>,
}

/// Background job settings
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct TasksConfig {
    /// How many merge or index jobs may run at the same time. [DEFAULT: number of CPUs]
    pub max_concurrent_jobs: Option<usize>,
    /// Tiles per read page and per write transaction
    pub page_size: Option<usize>,
    /// What to do when a merged tile already exists in the target
    pub on_duplicate: Option<CopyDuplicateMode>,
    /// What to do when a tile cannot be decoded while building a POI index
    pub on_tile_error: Option<TileErrorPolicy>,
    /// Submit an index job for every vector tileset when the server starts. [DEFAULT: true]
    pub index_on_startup: Option<bool>,

    #[serde(flatten, skip_serializing)]
    pub unrecognized: UnrecognizedValues,
}

impl TasksConfig {
    #[must_use]
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs.unwrap_or_else(num_cpus::get)
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    #[must_use]
    pub fn index_on_startup(&self) -> bool {
        self.index_on_startup.unwrap_or(true)
    }
}

#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub srv: SrvConfig,

    /// Directory with `tilesets/` and `fonts/` subdirectories
    pub data_path: Option<PathBuf>,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(flatten, skip_serializing)]
    pub unrecognized: UnrecognizedValues,
}

impl Config {
    /// Validate the values and warn about keys that are not understood
    pub fn finalize(&mut self) -> ConfigFileResult<UnrecognizedKeys> {
        let mut res: UnrecognizedKeys = self.unrecognized.keys().cloned().collect();
        res.extend(self.tasks.unrecognized.keys().map(|k| format!("tasks.{k}")));

        for key in &res {
            warn!(
                "Ignoring unrecognized configuration key '{key}'. Please check your configuration file for typos."
            );
        }

        if self.tasks.max_concurrent_jobs == Some(0) {
            return Err(ConfigFileError::ZeroValue("max_concurrent_jobs"));
        }
        if self.tasks.page_size == Some(0) {
            return Err(ConfigFileError::ZeroValue("page_size"));
        }
        if self.data_path.is_none() {
            self.data_path = Some(PathBuf::from(DATA_PATH_DEFAULT));
        }

        Ok(res)
    }

    #[must_use]
    pub fn data_path(&self) -> &Path {
        self.data_path
            .as_deref()
            .unwrap_or(Path::new(DATA_PATH_DEFAULT))
    }

    /// Open the data directory and start the task tracker.
    ///
    /// When `tasks.index_on_startup` is enabled, an index job is submitted for every tileset.
    pub async fn resolve(&self) -> OffmapResult<ServerState> {
        let data_path = self.data_path();
        if !data_path.is_dir() {
            return Err(OffmapError::DataPathNotFound(data_path.to_path_buf()));
        }

        let tilesets = Tilesets::resolve(data_path.join("tilesets")).await?;
        let fonts = FontStore::new(data_path.join("fonts"));
        let tasks = TaskTracker::new(JobSettings::from(&self.tasks));

        if self.tasks.index_on_startup() {
            for path in tilesets.paths() {
                tasks.submit_index(path);
            }
        }

        Ok(ServerState {
            tilesets,
            fonts,
            tasks,
        })
    }

    pub fn save_to_file(&self, file_name: &Path) -> ConfigFileResult<()> {
        let yaml = serde_yaml::to_string(&self).map_err(ConfigFileError::ConfigSerializeError)?;
        if file_name.as_os_str() == OsStr::new("-") {
            info!("Current system configuration:");
            println!("\n\n{yaml}\n");
            Ok(())
        } else {
            info!(
                "Saving config to {}, use --config to load it",
                file_name.display()
            );
            File::create(file_name)
                .map_err(|e| ConfigFileError::ConfigWriteError(e, file_name.to_path_buf()))?
                .write_all(yaml.as_bytes())
                .map_err(|e| ConfigFileError::ConfigWriteError(e, file_name.to_path_buf()))?;
            Ok(())
        }
    }
}

/// Read config from a file
pub fn read_config<'a, M>(file_name: &Path, env: &'a M) -> ConfigFileResult<Config>
where
    M: VariableMap<'a>,
    M::Value: AsRef<str>,
{
    let mut file =
        File::open(file_name).map_err(|e| ConfigFileError::ConfigLoadError(e, file_name.into()))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| ConfigFileError::ConfigLoadError(e, file_name.into()))?;
    parse_config(&contents, env, file_name)
}

/// Parse YAML config, substituting `${VAR}` references from `env`
pub fn parse_config<'a, M>(contents: &str, env: &'a M, file_name: &Path) -> ConfigFileResult<Config>
where
    M: VariableMap<'a>,
    M::Value: AsRef<str>,
{
    subst::yaml::from_str(contents, env)
        .map_err(|e| ConfigFileError::ConfigParseError(e, file_name.into()))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_yaml_snapshot;

    use super::*;

    fn parse(yaml: &str, env: &[(&str, &str)]) -> ConfigFileResult<Config> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        parse_config(yaml, &env, Path::new("test.yaml"))
    }

    #[test]
    fn parse_full_config() {
        let mut config = parse(
            indoc! {"
                listen_addresses: '127.0.0.1:8080'
                keep_alive: 10
                worker_processes: 2
                data_path: ${OFFMAP_DATA}
                tasks:
                  max_concurrent_jobs: 3
                  page_size: 1000
                  on_duplicate: override
                  on_tile_error: abort
                  index_on_startup: false
            "},
            &[("OFFMAP_DATA", "maps")],
        )
        .unwrap();
        assert!(config.finalize().unwrap().is_empty());
        assert_eq!(config.data_path(), Path::new("maps"));
        assert_eq!(config.tasks.max_concurrent_jobs(), 3);
        assert!(!config.tasks.index_on_startup());
        assert_yaml_snapshot!(config, @r#"
        keep_alive: 10
        listen_addresses: "127.0.0.1:8080"
        worker_processes: 2
        data_path: maps
        tasks:
          max_concurrent_jobs: 3
          page_size: 1000
          on_duplicate: override
          on_tile_error: abort
          index_on_startup: false
        "#);
    }

    #[test]
    fn defaults() {
        let mut config = Config::default();
        config.finalize().unwrap();
        assert_eq!(config.data_path(), Path::new(DATA_PATH_DEFAULT));
        assert_eq!(config.tasks.page_size(), DEFAULT_PAGE_SIZE);
        assert!(config.tasks.index_on_startup());
        assert!(config.tasks.max_concurrent_jobs() > 0);
        assert_eq!(config.tasks.on_duplicate, None);
    }

    #[test]
    fn unrecognized_keys() {
        let mut config = parse(
            indoc! {"
                listen_addreses: '127.0.0.1:8080'
                tasks:
                  max_jobs: 3
            "},
            &[],
        )
        .unwrap();
        let mut keys: Vec<_> = config.finalize().unwrap().into_iter().collect();
        keys.sort();
        assert_eq!(keys, vec!["listen_addreses", "tasks.max_jobs"]);
        assert_eq!(config.srv.listen_addresses, None);
    }

    #[test]
    fn zero_values_are_rejected() {
        let mut config = parse("tasks:\n  max_concurrent_jobs: 0\n", &[]).unwrap();
        assert!(matches!(
            config.finalize(),
            Err(ConfigFileError::ZeroValue("max_concurrent_jobs"))
        ));
        let mut config = parse("tasks:\n  page_size: 0\n", &[]).unwrap();
        assert!(matches!(
            config.finalize(),
            Err(ConfigFileError::ZeroValue("page_size"))
        ));
    }

    #[test]
    fn missing_variable_fails() {
        let err = parse("data_path: ${NOT_SET_ANYWHERE}\n", &[]).unwrap_err();
        assert!(matches!(err, ConfigFileError::ConfigParseError(..)), "{err}");
    }
}
