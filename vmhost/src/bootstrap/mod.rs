//! Guest bootstrap configuration (cloud-init / Ignition).
//!
//! A [`Bootstrap`] holds a template plus the set of variables it needs.
//! Rendering substitutes a per-instance context and writes the result into
//! the instance directory. Ignition templates are authored as Butane YAML
//! and converted to Ignition JSON by an external tool; the YAML source is
//! kept next to the JSON output.

mod template;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::errors::{VmhostError, VmhostResult};
use crate::repo::Entity;

/// Values substituted into a bootstrap template.
pub type BootstrapContext = BTreeMap<String, serde_json::Value>;

/// Bootstrap dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapKind {
    CloudInit,
    Ignition,
}

impl BootstrapKind {
    pub const ALL: [BootstrapKind; 2] = [BootstrapKind::CloudInit, BootstrapKind::Ignition];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapKind::CloudInit => "cloud-init",
            BootstrapKind::Ignition => "ignition",
        }
    }
}

impl fmt::Display for BootstrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootstrapKind {
    type Err = VmhostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cloud-init" | "cloud_init" | "cloudinit" => Ok(BootstrapKind::CloudInit),
            "ignition" => Ok(BootstrapKind::Ignition),
            other => Err(VmhostError::UnsupportedConfiguration(format!(
                "unknown bootstrap kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub id: String,
    pub name: String,
    pub kind: BootstrapKind,
    pub content: String,
    /// Variables the template reads without defining, fixed at construction.
    pub required_keys: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Bootstrap {
    const KIND: &'static str = "bootstrap";

    fn uid(&self) -> &str {
        &self.id
    }
}

impl Bootstrap {
    /// Parse `content` once and record its required keys.
    ///
    /// A template that does not parse fails with `Template`.
    pub fn new(
        name: impl Into<String>,
        kind: BootstrapKind,
        content: impl Into<String>,
    ) -> VmhostResult<Self> {
        let content = content.into();
        let required_keys = template::undeclared_variables(&content)?;

        Ok(Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            kind,
            content,
            required_keys,
            created_at: Utc::now(),
        })
    }

    /// Required keys absent from `context`, in sorted order.
    pub fn missing_keys(&self, context: &BootstrapContext) -> Vec<&str> {
        self.required_keys
            .iter()
            .filter(|key| !context.contains_key(*key))
            .map(String::as_str)
            .collect()
    }

    /// Render against `context` and write the final artifact to `output_path`.
    ///
    /// Nothing is written when a required key is missing. For Ignition the
    /// substituted text goes to [`intermediate_path`] first and `converter`
    /// produces `output_path` from it.
    pub async fn render(
        &self,
        context: &BootstrapContext,
        output_path: &Path,
        converter: &Path,
    ) -> VmhostResult<()> {
        let missing = self.missing_keys(context);
        if !missing.is_empty() {
            return Err(VmhostError::Template(format!(
                "bootstrap '{}' is missing context keys: {}",
                self.name,
                missing.join(", ")
            )));
        }

        let rendered = template::render(&self.content, context)?;

        match self.kind {
            BootstrapKind::CloudInit => {
                tokio::fs::write(output_path, rendered).await?;
            }
            BootstrapKind::Ignition => {
                let source = intermediate_path(output_path);
                tokio::fs::write(&source, rendered).await?;
                convert_ignition(converter, &source, output_path).await?;
            }
        }

        tracing::debug!(
            bootstrap = %self.name,
            kind = %self.kind,
            output = %output_path.display(),
            "Rendered bootstrap"
        );
        Ok(())
    }
}

/// Sibling source file for a converted artifact: `bootstrap.json` → `bootstrap.yaml`.
pub fn intermediate_path(output_path: &Path) -> PathBuf {
    let candidate = output_path.with_extension("yaml");
    if candidate == output_path {
        output_path.with_extension("src.yaml")
    } else {
        candidate
    }
}

async fn convert_ignition(converter: &Path, source: &Path, output: &Path) -> VmhostResult<()> {
    let result = Command::new(converter)
        .arg("--strict")
        .arg("--output")
        .arg(output)
        .arg(source)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            VmhostError::RenderFailure(format!(
                "failed to run ignition converter {}: {}",
                converter.display(),
                e
            ))
        })?;

    if !result.status.success() {
        return Err(VmhostError::RenderFailure(format!(
            "{} exited with {}: {}",
            converter.display(),
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }
    Ok(())
}
