/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use regex::{Captures, Regex};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ConfigError, DroverConfig};

/// Finds and reads `drover.toml`.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Searches `./drover.toml`, the user config directory, then `/etc/drover`.
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./drover.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("drover").join("config.toml"));
        }
        search_paths.push(PathBuf::from("/etc/drover/config.toml"));
        Self::with_search_paths(search_paths)
    }

    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Loads the explicit file, then `DROVER_CONFIG`, then the first file
    /// found on the search path. With none of them present the defaults apply.
    pub fn load_config(&self, config_file: Option<&Path>) -> Result<DroverConfig, ConfigError> {
        let config_path = match config_file {
            Some(path) => Some(path.to_path_buf()),
            None => env::var_os("DROVER_CONFIG")
                .map(PathBuf::from)
                .or_else(|| self.find_config_file()),
        };

        match config_path {
            Some(path) => self.load_config_from_file(&path),
            None => {
                debug!(searched = ?self.search_paths, "No configuration file found; using defaults");
                Ok(DroverConfig::default())
            }
        }
    }

    pub fn load_config_from_file(&self, path: &Path) -> Result<DroverConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let content = substitute_env_vars(&content)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => {
                debug!(path = %path.display(), "Loaded configuration file");
                Ok(toml::from_str(&content)?)
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat {
                extension: ext.to_string(),
            }),
        }
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths.iter().find(|path| path.is_file()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Expands `${VAR}`, `${VAR:-default}` and `${VAR:?message}`.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;

    let mut failure = None;
    let substituted = re.replace_all(content, |caps: &Captures| {
        match resolve_var_expression(&caps[1]) {
            Ok(value) => value,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(substituted.into_owned()),
    }
}

fn resolve_var_expression(expr: &str) -> Result<String, ConfigError> {
    if let Some((name, default)) = expr.split_once(":-") {
        return Ok(env::var(name).unwrap_or_else(|_| default.to_string()));
    }
    if let Some((name, message)) = expr.split_once(":?") {
        return env::var(name).map_err(|_| {
            ConfigError::EnvSubstitutionError(format!(
                "Required environment variable '{}' is not set: {}",
                name, message
            ))
        });
    }
    env::var(expr).map_err(|_| {
        ConfigError::EnvSubstitutionError(format!(
            "Required environment variable '{}' is not set",
            expr
        ))
    })
}
