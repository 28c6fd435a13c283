use std::path::Path;

use anyhow::{Context, Result};
use itsm_core::ClassificationRules;
use tracing::info;

/// Rule table from a YAML file, or the built-in table when no path is given.
pub fn load_rules(path: Option<&Path>) -> Result<ClassificationRules> {
    let Some(path) = path else {
        return Ok(ClassificationRules::builtin());
    };
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rules: ClassificationRules =
        serde_yaml::from_str(&yaml).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), rules = rules.rules.len(), "loaded classification rules");
    Ok(rules)
}
