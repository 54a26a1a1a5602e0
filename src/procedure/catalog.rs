//! Directory of procedure definitions.

use std::collections::BTreeMap;
use std::path::Path;

use walkdir::WalkDir;

use super::Procedure;

/// Procedures loaded from a directory tree, keyed by procedure id.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
    procedures: BTreeMap<String, Procedure>,
}

impl ProcedureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` file under `root`.
    ///
    /// Files that fail to parse or validate are skipped with a warning. When
    /// two files declare the same id, the one visited last (sorted by path) wins.
    pub fn load_dir(root: &Path, strict: bool) -> Self {
        let mut catalog = Self::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file());

        for entry in walker {
            let path = entry.path();
            let is_definition = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("json") | Some("yaml") | Some("yml")
            );
            if !is_definition {
                continue;
            }
            match Procedure::from_path(path).and_then(|p| p.validate(strict).map(|_| p)) {
                Ok(procedure) => {
                    tracing::debug!(
                        procedure_id = %procedure.id,
                        path = %path.display(),
                        "Loaded procedure definition"
                    );
                    catalog.insert(procedure);
                }
                Err(e) => {
                    tracing::warn!("Skipping procedure definition {}: {}", path.display(), e);
                }
            }
        }
        catalog
    }

    pub fn insert(&mut self, procedure: Procedure) -> Option<Procedure> {
        self.procedures.insert(procedure.id.clone(), procedure)
    }

    pub fn get(&self, id: &str) -> Option<&Procedure> {
        self.procedures.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
