//! Label catalog.
//!
//! The labels keeper workflows apply or read are listed in
//! `fixtures/labels.yaml` and created in the target repository when missing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::github::GitHubClient;

const BUILTIN_CATALOG: &str = include_str!("../fixtures/labels.yaml");

/// A repository label definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSpec {
    /// Label name, matched exactly.
    pub name: String,
    /// Hex color without `#`.
    pub color: String,
    /// Description shown in the GitHub UI.
    #[serde(default)]
    pub description: String,
}

impl LabelSpec {
    /// Creates a label definition.
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            description: description.into(),
        }
    }
}

/// A set of label definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelCatalog {
    pub labels: Vec<LabelSpec>,
}

impl LabelCatalog {
    /// The catalog shipped with the harness.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Parses a catalog from YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Loads a catalog from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<()> {
        for label in &self.labels {
            if label.name.trim().is_empty() {
                return Err(Error::Config("label with empty name in catalog".to_string()));
            }
            if label.color.len() != 6 || !label.color.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::Config(format!(
                    "label {:?} has invalid color {:?}",
                    label.name, label.color
                )));
            }
        }
        Ok(())
    }

    /// Looks up a label by exact name.
    pub fn get(&self, name: &str) -> Option<&LabelSpec> {
        self.labels.iter().find(|l| l.name == name)
    }

    /// Label names in catalog order.
    pub fn names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Creates every catalog label missing from the repository checked out at `dir`.
    ///
    /// Returns the names that could not be created.
    pub fn ensure_all(&self, github: &GitHubClient, dir: &Path) -> Vec<String> {
        let mut failed = Vec::new();
        for label in &self.labels {
            if !github.create_label(dir, label) {
                tracing::warn!(label = %label.name, "failed to create label");
                failed.push(label.name.clone());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REQUIRED_LABELS;

    #[test]
    fn builtin_catalog_parses() {
        let catalog = LabelCatalog::builtin().unwrap();
        let triage = catalog.get("triage").unwrap();
        assert_eq!(triage.color, "FFFF00");
        assert_eq!(triage.description, "Needs triage");
        assert_eq!(catalog.get("ready for review").unwrap().color, "0E8A16");
        assert!(catalog.get("Triage").is_none());
    }

    #[test]
    fn builtin_catalog_covers_required_and_scenario_labels() {
        let catalog = LabelCatalog::builtin().unwrap();
        for name in DEFAULT_REQUIRED_LABELS {
            assert!(catalog.get(name).is_some(), "missing {name}");
        }
        for name in ["wip", "hold", "poc", "release 1.5", "backport 1.4", "release devel"] {
            assert!(catalog.get(name).is_some(), "missing {name}");
        }
    }

    #[test]
    fn rejects_bad_color() {
        let err =
            LabelCatalog::from_yaml("labels:\n  - name: x\n    color: \"#12345\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid color"));
    }

    #[test]
    fn description_is_optional() {
        let catalog =
            LabelCatalog::from_yaml("labels:\n  - name: x\n    color: \"abcdef\"\n").unwrap();
        assert_eq!(catalog.names(), vec!["x"]);
        assert_eq!(catalog.labels[0].description, "");
    }
}
