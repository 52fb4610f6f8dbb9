//! Tool catalog - the `component -> schema` lookup and output naming
//!
//! The catalog itself is maintained elsewhere (admin tooling); the engine only
//! reads it. A catalog file maps component names to schemas:
//! ```yaml
//! fastqc:
//!   command: fastqc
//!   env: "source /opt/conda/bin/activate qc && __COMMAND__"
//!   output_flag: "-o"
//!   options:
//!     - name: threads
//!       type: number
//!       flag: "--threads"
//!     - name: quiet
//!       type: boolean
//!       flag: "-q"
//! ```

use crate::core::Node;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {path}: {message}")]
    Parse { path: String, message: String },
}

/// Value type of a tool option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OptionType {
    Boolean,
    Number,
    Select,
    File,
    #[default]
    Text,
}

/// One configurable option of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub option_type: OptionType,
    /// Command-line flag; defaults to `--<name>`
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub label: Option<String>,
}

impl OptionSpec {
    /// Flag passed on the command line
    pub fn flag(&self) -> String {
        self.flag
            .clone()
            .unwrap_or_else(|| format!("--{}", self.name))
    }

    /// Human-facing name used in validation messages
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

fn default_has_stderr() -> bool {
    true
}

/// Everything the engine needs to turn a node into a command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Base command, e.g. `fastqc` or `samtools sort`
    pub command: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Environment wrapper containing `__COMMAND__`
    #[serde(default)]
    pub env: Option<String>,
    /// Whether stderr output is forwarded to the caller
    #[serde(default = "default_has_stderr")]
    pub has_stderr: bool,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    /// Flag used to pass the resolved output path, e.g. `-o`
    #[serde(default)]
    pub output_flag: Option<String>,
    /// Suffix appended to conventional output names
    #[serde(default)]
    pub output_suffix: Option<String>,
}

impl ToolSchema {
    /// Schema with just a base command
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: None,
            env: None,
            has_stderr: true,
            options: Vec::new(),
            output_flag: None,
            output_suffix: None,
        }
    }

    /// Look up a declared option
    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }
}

/// External `component -> schema` lookup
pub trait ToolCatalog: Send + Sync {
    fn lookup(&self, component: &str) -> Option<&ToolSchema>;
}

/// Catalog held in memory, usually loaded from a YAML or JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCatalog {
    tools: HashMap<String, ToolSchema>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tool schema
    pub fn insert(&mut self, component: impl Into<String>, schema: ToolSchema) {
        self.tools.insert(component.into(), schema);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, component: impl Into<String>, schema: ToolSchema) -> Self {
        self.insert(component, schema);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Load from `.json`, otherwise YAML
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: display.clone(),
            source,
        })?;

        let parsed = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| CatalogError::Parse {
            path: display,
            message,
        })
    }
}

impl ToolCatalog for StaticCatalog {
    fn lookup(&self, component: &str) -> Option<&ToolSchema> {
        self.tools.get(component)
    }
}

/// External `(node) -> [output files]` naming collaborator
pub trait OutputResolver: Send + Sync {
    fn outputs(&self, node: &Node, schema: Option<&ToolSchema>) -> Vec<String>;
}

/// Names outputs `<work_dir>/<component>_<node_id><suffix>`.
///
/// This only guesses what a tool wrote; it is correct exactly when the tool
/// is told to write there (see `ToolSchema::output_flag`).
#[derive(Debug, Clone)]
pub struct NamingConvention {
    pub work_dir: String,
    pub default_suffix: String,
}

impl NamingConvention {
    /// Resolver writing outputs under `work_dir`
    pub fn new(work_dir: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            default_suffix: ".out".to_string(),
        }
    }
}

impl OutputResolver for NamingConvention {
    fn outputs(&self, node: &Node, schema: Option<&ToolSchema>) -> Vec<String> {
        if node.output_ports().next().is_none() {
            return Vec::new();
        }
        let suffix = schema
            .and_then(|s| s.output_suffix.as_deref())
            .unwrap_or(&self.default_suffix);
        let name = format!("{}_{}{}", node.component, node.id, suffix);
        vec![crate::remote::join_path(&self.work_dir, &name)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Graph, NodeKind};
    use std::io::Write;

    #[test]
    fn test_load_yaml_catalog() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            r#"
fastqc:
  command: fastqc
  env: "conda run -n qc __COMMAND__"
  output_flag: "-o"
  options:
    - name: threads
      type: number
      flag: "--threads"
      required: true
    - name: quiet
      type: boolean
"#
        )
        .unwrap();

        let catalog = StaticCatalog::from_file(file.path()).unwrap();
        let schema = catalog.lookup("fastqc").unwrap();
        assert_eq!(schema.command, "fastqc");
        assert!(schema.has_stderr);
        assert_eq!(schema.options.len(), 2);
        assert_eq!(schema.options[0].option_type, OptionType::Number);
        assert_eq!(schema.option("quiet").unwrap().flag(), "--quiet");
        assert!(catalog.lookup("bwa").is_none());
    }

    #[test]
    fn test_missing_catalog_file() {
        let err = StaticCatalog::from_file(Path::new("/nonexistent/catalog.yml")).unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }

    #[test]
    fn test_naming_convention() {
        let mut graph = Graph::new();
        let t = graph.add_node("fastqc", NodeKind::Transform);
        let v = graph.add_node("igv", NodeKind::View);
        let convention = NamingConvention::new("/scratch/run/");

        let mut schema = ToolSchema::new("fastqc");
        schema.output_suffix = Some(".html".into());

        assert_eq!(
            convention.outputs(graph.node(&t).unwrap(), Some(&schema)),
            vec!["/scratch/run/fastqc_node_1.html".to_string()]
        );
        assert_eq!(
            convention.outputs(graph.node(&t).unwrap(), None),
            vec!["/scratch/run/fastqc_node_1.out".to_string()]
        );
        assert!(convention.outputs(graph.node(&v).unwrap(), None).is_empty());
    }
}
