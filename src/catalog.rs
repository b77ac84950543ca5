use crate::models::{validate_bank, QuestionBank, ValidationIssue};
use jsonschema::Validator;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::{fs, io};
use thiserror::Error;
use tracing::{info, warn};

const BUILTIN_BANKS: &[(&str, &str)] = &[
    (
        "inspection_testing_mock.json",
        include_str!("../banks/inspection_testing_mock.json"),
    ),
    (
        "level3_module5_inspection.json",
        include_str!("../banks/level3_module5_inspection.json"),
    ),
    ("fire_safety_mock.json", include_str!("../banks/fire_safety_mock.json")),
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: io::Error,
    },
    #[error("{origin} is not valid JSON: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{origin} does not match the question bank schema")]
    Schema { origin: String, details: Vec<ValidationIssue> },
    #[error("{origin} failed validation")]
    Invalid { origin: String, details: Vec<ValidationIssue> },
}

impl CatalogError {
    pub fn details(&self) -> &[ValidationIssue] {
        match self {
            CatalogError::Schema { details, .. } | CatalogError::Invalid { details, .. } => details,
            _ => &[],
        }
    }
}

/// Parses and checks one bank against the JSON schema and the semantic rules.
pub fn parse_bank(schema: &Validator, origin: &str, raw: &str) -> Result<QuestionBank, CatalogError> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|source| CatalogError::Json {
        origin: origin.to_string(),
        source,
    })?;
    if schema.validate(&value).is_err() {
        let details = schema
            .iter_errors(&value)
            .map(|e| ValidationIssue {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(CatalogError::Schema {
            origin: origin.to_string(),
            details,
        });
    }
    let bank: QuestionBank = serde_json::from_value(value).map_err(|source| CatalogError::Json {
        origin: origin.to_string(),
        source,
    })?;
    validate_bank(&bank).map_err(|details| CatalogError::Invalid {
        origin: origin.to_string(),
        details,
    })?;
    Ok(bank)
}

pub fn compile_schema() -> anyhow::Result<Validator> {
    let raw = include_str!("../contracts/question_bank.schema.json");
    let schema: serde_json::Value = serde_json::from_str(raw)?;
    jsonschema::draft202012::new(&schema).map_err(|e| anyhow::anyhow!("question bank schema: {e}"))
}

#[derive(Debug, Default)]
pub struct BankCatalog {
    banks: BTreeMap<String, Arc<QuestionBank>>,
}

impl BankCatalog {
    /// Loads the built-in banks, then every `*.json` file in `extra_dir`.
    /// A broken built-in bank is fatal; a broken directory bank is skipped.
    pub fn load(extra_dir: Option<&Path>) -> anyhow::Result<Self> {
        let schema = compile_schema()?;
        let mut catalog = Self::default();
        for (origin, raw) in BUILTIN_BANKS {
            let bank = parse_bank(&schema, origin, raw)?;
            catalog.insert(bank);
        }
        if let Some(dir) = extra_dir {
            catalog.load_dir(&schema, dir);
        }
        info!(banks = catalog.banks.len(), "question bank catalog loaded");
        Ok(catalog)
    }

    fn load_dir(&mut self, schema: &Validator, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("cannot read banks directory {}: {}", dir.display(), err);
                return;
            }
        };
        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            let origin = path.display().to_string();
            let parsed = fs::read_to_string(&path)
                .map_err(|source| CatalogError::Io {
                    origin: origin.clone(),
                    source,
                })
                .and_then(|raw| parse_bank(schema, &origin, &raw));
            match parsed {
                Ok(bank) => self.insert(bank),
                Err(err) => warn!(issues = err.details().len(), "skipping question bank: {}", err),
            }
        }
    }

    pub fn insert(&mut self, bank: QuestionBank) {
        let id = bank.id.clone();
        if self.banks.insert(id.clone(), Arc::new(bank)).is_some() {
            warn!("question bank {} replaced by a later definition", id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<QuestionBank>> {
        self.banks.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QuestionBank>> {
        self.banks.values()
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}
