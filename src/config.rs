//! JSON-backed field and table mapping, used to resolve criteria built
//! from user-supplied property paths.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::ast::{Criteria, QueryField, Source};

/// Mapping configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mapping config error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

/// Maps property names to datasource columns and relationship names to
/// tables. Anything absent falls back to a convention: columns keep the
/// property name, tables are the lowercased relationship name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub columns: HashMap<String, String>,
    #[serde(default)]
    pub tables: HashMap<String, String>,
}

impl MappingConfig {
    /// Load a mapping from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::new(format!(
                "config file does not exist: {}",
                path_ref.display()
            )));
        }

        let content = fs::read_to_string(path_ref).map_err(|e| {
            ConfigError::new(format!("cannot read config file {}: {}", path_ref.display(), e))
        })?;

        let config: MappingConfig = serde_json::from_str(&content).map_err(|e| {
            ConfigError::new(format!("cannot parse config file {}: {}", path_ref.display(), e))
        })?;

        Ok(config)
    }

    /// The table for an entity, lowercased when unmapped.
    pub fn table_for(&self, entity: &str) -> String {
        self.tables
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.to_lowercase())
    }

    /// The column backing a property, the property name itself when unmapped.
    pub fn column_for(&self, property: &str) -> String {
        self.columns
            .get(property)
            .cloned()
            .unwrap_or_else(|| property.to_string())
    }

    /// Resolve a dotted property path into a fully qualified field: the
    /// column name comes from the column mapping, each source link's entity
    /// from the table mapping.
    pub fn resolve(&self, path: &str) -> QueryField {
        let mut field = QueryField::from_path(path);
        field.field_name = self.column_for(&field.property_name);
        if let Some(source) = field.source.as_mut() {
            self.resolve_source(source);
        }
        field
    }

    /// Resolve every leaf field of an already-built tree in place. Parsed
    /// criteria carry convention-named fields until this runs.
    pub fn resolve_criteria(&self, criteria: &mut Criteria) {
        match criteria {
            Criteria::Leaf { field, .. } => {
                field.field_name = self.column_for(&field.property_name);
                if let Some(source) = field.source.as_mut() {
                    self.resolve_source(source);
                }
            }
            Criteria::Composite { left, right, .. } => {
                self.resolve_criteria(left);
                self.resolve_criteria(right);
            }
        }
    }

    fn resolve_source(&self, source: &mut Source) {
        source.entity_name = self.table_for(&source.name);
        if let Some(child) = source.child.as_deref_mut() {
            self.resolve_source(child);
        }
    }

    /// A small mapping used by the demo and tests.
    pub fn sample() -> Self {
        let mut columns = HashMap::new();
        columns.insert("Surname".to_string(), "surname".to_string());
        columns.insert("DateOfBirth".to_string(), "date_of_birth".to_string());

        let mut tables = HashMap::new();
        tables.insert("Person".to_string(), "people".to_string());
        tables.insert("Father".to_string(), "contact_person".to_string());
        tables.insert("Mother".to_string(), "contact_person".to_string());

        Self { columns, tables }
    }
}
