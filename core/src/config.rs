// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Layered configuration: defaults baked into this crate, overridden by a
//! repo-level TOML document, overridden by session-scoped procedure flags.

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use toml_edit::DocumentMut;

use crate::error::ErrorKind;
use crate::error::Kind;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration cannot be parsed as a TOML document")]
    Parse(#[from] toml_edit::TomlError),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ErrorKind for ConfigLoadError {
    fn kind(&self) -> Kind {
        Kind::InvalidArgs
    }
}

/// Which safepoint discipline the GC coordinator should use; selected via
/// `DOLT_GC_SAFEPOINT_CONTROLLER_CHOICE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafepointDiscipline {
    #[default]
    KillConnections,
    SessionAware,
}

impl FromStr for SafepointDiscipline {
    type Err = ConfigLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kill_connections" => Ok(Self::KillConnections),
            "session_aware" => Ok(Self::SessionAware),
            other => Err(ConfigLoadError::InvalidValue {
                key: "DOLT_GC_SAFEPOINT_CONTROLLER_CHOICE".to_string(),
                message: format!("unknown safepoint discipline {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawConfig {
    init: Option<RawInit>,
    branch: Option<RawBranch>,
    push: Option<RawPush>,
    gpgsign: Option<bool>,
    signingkey: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawInit {
    defaultbranch: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawBranch {
    autosetupmerge: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawPush {
    #[serde(rename = "autoSetupRemote")]
    auto_setup_remote: Option<bool>,
}

/// Typed, layered access to the config keys honored by this crate (spec §6).
///
/// Layers are applied in order: crate defaults, then `repo`, then `session`
/// (each `Option` field present in a later layer overrides an earlier one).
#[derive(Debug, Clone)]
pub struct DoltConfig {
    default_branch: String,
    branch_autosetupmerge: bool,
    push_auto_setup_remote: bool,
    gpgsign: bool,
    signingkey: Option<String>,
    disable_gc_procedure: bool,
    gc_safepoint_controller: SafepointDiscipline,
}

impl Default for DoltConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            branch_autosetupmerge: true,
            push_auto_setup_remote: false,
            gpgsign: false,
            signingkey: None,
            disable_gc_procedure: false,
            gc_safepoint_controller: SafepointDiscipline::default(),
        }
    }
}

impl DoltConfig {
    /// Parses a repo-level TOML document and layers it over the crate
    /// defaults. `env` supplies the two environment-variable overrides from
    /// spec §6 (`DOLT_DISABLE_GC_PROCEDURE`, `DOLT_GC_SAFEPOINT_CONTROLLER_CHOICE`).
    pub fn load(repo_toml: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigLoadError> {
        let mut config = Self::default();
        if !repo_toml.trim().is_empty() {
            let document: DocumentMut = repo_toml.parse()?;
            let raw: RawConfig = toml_edit::de::from_document(document)?;
            config.apply(raw);
        }
        if let Some(value) = env("DOLT_DISABLE_GC_PROCEDURE") {
            config.disable_gc_procedure = value == "1" || value.eq_ignore_ascii_case("true");
        }
        if let Some(value) = env("DOLT_GC_SAFEPOINT_CONTROLLER_CHOICE") {
            config.gc_safepoint_controller = value.parse()?;
        }
        Ok(config)
    }

    fn apply(&mut self, raw: RawConfig) {
        if let Some(branch) = raw.default_branch() {
            self.default_branch = branch;
        }
        if let Some(value) = raw.branch.and_then(|b| b.autosetupmerge) {
            self.branch_autosetupmerge = value;
        }
        if let Some(value) = raw.push.and_then(|p| p.auto_setup_remote) {
            self.push_auto_setup_remote = value;
        }
        if let Some(value) = raw.gpgsign {
            self.gpgsign = value;
        }
        if let Some(key) = raw.signingkey {
            self.signingkey = Some(key);
        }
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    pub fn branch_autosetupmerge(&self) -> bool {
        self.branch_autosetupmerge
    }

    pub fn push_auto_setup_remote(&self) -> bool {
        self.push_auto_setup_remote
    }

    pub fn gpgsign(&self) -> bool {
        self.gpgsign
    }

    pub fn signingkey(&self) -> Option<&str> {
        self.signingkey.as_deref()
    }

    pub fn disable_gc_procedure(&self) -> bool {
        self.disable_gc_procedure
    }

    pub fn gc_safepoint_controller(&self) -> SafepointDiscipline {
        self.gc_safepoint_controller
    }

    pub fn with_default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }
}

impl RawConfig {
    fn default_branch(&self) -> Option<String> {
        self.init.as_ref().and_then(|i| i.defaultbranch.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_repo_toml() {
        let config = DoltConfig::load("", |_| None).unwrap();
        assert_eq!(config.default_branch(), "main");
        assert!(!config.disable_gc_procedure());
        assert_eq!(config.gc_safepoint_controller(), SafepointDiscipline::KillConnections);
    }

    #[test]
    fn repo_toml_overrides_defaults() {
        let toml = r#"
            [init]
            defaultbranch = "trunk"
            [push]
            autoSetupRemote = true
        "#;
        let config = DoltConfig::load(toml, |_| None).unwrap();
        assert_eq!(config.default_branch(), "trunk");
        assert!(config.push_auto_setup_remote());
    }

    #[test]
    fn env_overrides_toml() {
        let config = DoltConfig::load("", |key| match key {
            "DOLT_GC_SAFEPOINT_CONTROLLER_CHOICE" => Some("session_aware".to_string()),
            "DOLT_DISABLE_GC_PROCEDURE" => Some("true".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.gc_safepoint_controller(), SafepointDiscipline::SessionAware);
        assert!(config.disable_gc_procedure());
    }
}
