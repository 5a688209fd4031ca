//! Named bundles of a header mapping and column formulas, stored as JSON files.

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    apply::{Formula, RowOutcome},
    error::FormulaResult,
    headers::HeaderMapping,
    table::Table,
    whitelist::Limits,
};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template `{0}` not found")]
    NotFound(String),

    #[error("`{0}` is not a valid template name")]
    InvalidName(String),

    #[error("failed to access `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{path}` is not a valid template")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub header_mapping: HeaderMapping,
    /// Column name → formula text.
    #[serde(default)]
    pub formulas: BTreeMap<String, String>,
}

/// Per-column row outcomes from [`Template::apply`].
pub type ColumnOutcomes = Vec<(String, Vec<RowOutcome>)>;

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Template {
            name: name.into(),
            ..Template::default()
        }
    }

    /// Validates every formula, then applies them in column-name order. A later formula sees
    /// the columns written by earlier ones. Nothing is evaluated if any formula is rejected.
    pub fn apply(&self, table: &Table) -> FormulaResult<(Table, ColumnOutcomes)> {
        self.apply_with(table, &Limits::default())
    }

    pub fn apply_with(
        &self,
        table: &Table,
        limits: &Limits,
    ) -> FormulaResult<(Table, ColumnOutcomes)> {
        let formulas = self
            .formulas
            .iter()
            .map(|(column, text)| {
                Formula::with_limits(text.as_str(), limits).map(|formula| (column, formula))
            })
            .collect::<FormulaResult<Vec<_>>>()?;

        let mut table = table.clone();
        let mut outcomes = Vec::with_capacity(formulas.len());
        for (column, formula) in formulas {
            let applied = formula.apply(&table, column);
            table = applied.table;
            outcomes.push((column.clone(), applied.outcomes));
        }
        Ok((table, outcomes))
    }
}

/// A directory of `<name>.json` templates.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TemplateStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> Result<PathBuf, TemplateError> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !valid {
            return Err(TemplateError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn save(&self, template: &Template) -> Result<PathBuf, TemplateError> {
        let path = self.path(&template.name)?;
        fs::create_dir_all(&self.dir).map_err(|source| TemplateError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(template).map_err(|source| TemplateError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| TemplateError::Io {
            path: path.clone(),
            source,
        })?;
        info!(name = %template.name, path = %path.display(), "template saved");
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Template, TemplateError> {
        let path = self.path(name)?;
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(name.to_string()));
            }
            Err(source) => return Err(TemplateError::Io { path, source }),
        };
        debug!(name, path = %path.display(), "loading template");
        serde_json::from_str(&json).map_err(|source| TemplateError::Json { path, source })
    }

    /// Names of stored templates, sorted. A missing directory holds no templates.
    pub fn list(&self) -> Result<Vec<String>, TemplateError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TemplateError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| TemplateError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
