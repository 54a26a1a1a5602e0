//! Configuration management for servicerun.
//!
//! Configuration can be set via environment variables:
//! - `SERVICERUN_DATA_DIR` - Optional. Directory for persistent stores. Defaults to `./.servicerun`.
//! - `SERVICERUN_STORE` - Optional. `memory`, `file` (`json`) or `sqlite` (`db`). Defaults to `sqlite`.
//! - `SERVICERUN_OPERATOR` - Optional. Store namespace. Defaults to `default`.
//! - `SERVICERUN_LAYOUT` - Optional. `sequence` or `centered`. Defaults to `sequence`.
//! - `SERVICERUN_TECHNICIAN_A` / `SERVICERUN_TECHNICIAN_B` - Optional. Technicians in roles A and B.
//! - `SERVICERUN_TECHNICIANS` - Optional. JSON or YAML roster used to resolve initials.
//! - `SERVICERUN_STRICT_STEP_IDS` - Optional. Reject malformed step ids at load time.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::layout::LayoutMode;
use crate::run::RunOptions;
use crate::store::StoreType;
use crate::technician::{
    InMemoryDirectory, Role, RosterError, SessionContext, TechnicianDirectory,
};
use crate::util::{non_empty, parse_bool};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base directory for file and sqlite stores
    pub data_dir: PathBuf,

    pub store_type: StoreType,

    /// Namespace for store files (one document/database per operator)
    pub operator: String,

    /// Layout used for first-run placement and explicit re-layout
    pub layout_mode: LayoutMode,

    pub technician_a: Option<String>,
    pub technician_b: Option<String>,

    /// Roster file; without one, completions carry ids but no initials
    pub technicians_file: Option<PathBuf>,

    pub strict_step_ids: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown store type, layout
    /// mode, or boolean spelling.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| non_empty(lookup(name));

        let data_dir = var("SERVICERUN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".servicerun"));

        let store_type = match var("SERVICERUN_STORE") {
            Some(value) => value
                .parse()
                .map_err(|e| ConfigError::InvalidValue("SERVICERUN_STORE".to_string(), e))?,
            None => StoreType::default(),
        };

        let operator = var("SERVICERUN_OPERATOR").unwrap_or_else(|| "default".to_string());

        let layout_mode = match var("SERVICERUN_LAYOUT") {
            Some(value) => LayoutMode::parse(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SERVICERUN_LAYOUT".to_string(),
                    format!("unknown layout mode {:?}", value),
                )
            })?,
            None => LayoutMode::default(),
        };

        let strict_step_ids = match var("SERVICERUN_STRICT_STEP_IDS") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SERVICERUN_STRICT_STEP_IDS".to_string(),
                    format!("expected a boolean, got {:?}", value),
                )
            })?,
            None => false,
        };

        Ok(Self {
            data_dir,
            store_type,
            operator,
            layout_mode,
            technician_a: var("SERVICERUN_TECHNICIAN_A"),
            technician_b: var("SERVICERUN_TECHNICIAN_B"),
            technicians_file: var("SERVICERUN_TECHNICIANS").map(PathBuf::from),
            strict_step_ids,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(data_dir: PathBuf, store_type: StoreType) -> Self {
        Self {
            data_dir,
            store_type,
            operator: "default".to_string(),
            layout_mode: LayoutMode::default(),
            technician_a: None,
            technician_b: None,
            technicians_file: None,
            strict_step_ids: false,
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            layout: self.layout_mode,
            strict_step_ids: self.strict_step_ids,
        }
    }

    /// Technician directory from the configured roster, or an empty one.
    pub fn directory(&self) -> Result<InMemoryDirectory, RosterError> {
        match &self.technicians_file {
            Some(path) => InMemoryDirectory::from_path(path),
            None => Ok(InMemoryDirectory::new()),
        }
    }

    /// Session with the configured role bindings.
    pub fn session(&self, directory: Arc<dyn TechnicianDirectory>) -> SessionContext {
        let mut session = SessionContext::new(directory);
        session.bind(Role::A, self.technician_a.clone());
        session.bind(Role::B, self.technician_b.clone());
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).expect("config");
        assert_eq!(config, Config::new(PathBuf::from(".servicerun"), StoreType::Sqlite));
    }

    #[test]
    fn reads_every_variable() {
        let config = load(&[
            ("SERVICERUN_DATA_DIR", "/var/lib/servicerun"),
            ("SERVICERUN_STORE", "json"),
            ("SERVICERUN_OPERATOR", "north-yard"),
            ("SERVICERUN_LAYOUT", "centered"),
            ("SERVICERUN_TECHNICIAN_A", "t-1"),
            ("SERVICERUN_TECHNICIAN_B", " "),
            ("SERVICERUN_STRICT_STEP_IDS", "yes"),
            ("SERVICERUN_TECHNICIANS", "/etc/servicerun/crew.yaml"),
        ])
        .expect("config");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/servicerun"));
        assert_eq!(config.store_type, StoreType::File);
        assert_eq!(config.operator, "north-yard");
        assert_eq!(config.layout_mode, LayoutMode::Centered);
        assert_eq!(config.technician_a.as_deref(), Some("t-1"));
        assert_eq!(config.technician_b, None);
        assert!(config.strict_step_ids);

        let session = config.session(Arc::new(InMemoryDirectory::new()));
        assert_eq!(session.technician(Role::A), Some("t-1"));
        assert_eq!(session.technician(Role::B), None);
        assert!(config.run_options().strict_step_ids);
        assert_eq!(
            config.technicians_file,
            Some(PathBuf::from("/etc/servicerun/crew.yaml"))
        );
    }

    #[test]
    fn roster_resolves_initials_for_bound_roles() {
        let temp = tempfile::tempdir().expect("tempdir");
        let roster = temp.path().join("crew.json");
        std::fs::write(&roster, r#"[{"id":"t-1","displayName":"Ada Lovelace"}]"#).unwrap();
        let config = load(&[
            ("SERVICERUN_TECHNICIAN_A", "t-1"),
            ("SERVICERUN_TECHNICIANS", roster.to_str().unwrap()),
        ])
        .expect("config");

        let session = config.session(Arc::new(config.directory().expect("roster")));
        let step = crate::procedure::Step::new("1", crate::procedure::Assignment::A, vec![]);
        assert_eq!(
            session.attribute(&step).and_then(|who| who.initials).as_deref(),
            Some("AL")
        );
        assert!(load(&[]).expect("config").directory().expect("empty").is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            load(&[("SERVICERUN_STORE", "redis")]),
            Err(ConfigError::InvalidValue(name, _)) if name == "SERVICERUN_STORE"
        ));
        assert!(matches!(
            load(&[("SERVICERUN_LAYOUT", "radial")]),
            Err(ConfigError::InvalidValue(name, _)) if name == "SERVICERUN_LAYOUT"
        ));
        assert!(matches!(
            load(&[("SERVICERUN_STRICT_STEP_IDS", "sometimes")]),
            Err(ConfigError::InvalidValue(name, _)) if name == "SERVICERUN_STRICT_STEP_IDS"
        ));
    }
}
