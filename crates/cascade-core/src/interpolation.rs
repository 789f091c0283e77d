//! Command templates and `${{ key }}` interpolation.
//!
//! Templates are rendered against an explicit [`InterpolationContext`] built
//! from concrete values that are already known (repository, package, artifact).
//! Nothing is resolved lazily at execution time.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Well-known interpolation keys.
pub mod vars {
    pub const REPOSITORY_NAME: &str = "repository.name";
    pub const REPOSITORY_URL: &str = "repository.url";
    pub const SOURCE_REF: &str = "source.ref";
    pub const ARCHITECTURE: &str = "architecture";
    pub const PACKAGE_NAME: &str = "package.name";
    pub const PACKAGE_PATH: &str = "package.path";
    pub const PACKAGE_SKIP_KEYS: &str = "package.skip_keys";
    pub const ARTIFACT_PACKAGE: &str = "artifact.package";
    pub const ARTIFACT_PATH: &str = "artifact.path";
    pub const ARTIFACT_FILE_NAME: &str = "artifact.file_name";
    pub const ARTIFACT_DISTRIBUTION: &str = "artifact.distribution";
    pub const ARTIFACT_ARCHITECTURE: &str = "artifact.architecture";
}

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpolationContext {
    pub variables: BTreeMap<String, String>,
}

impl InterpolationContext {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.variables.insert(key.to_string(), value.into());
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ key }}` - direct variable lookup
    /// - `${{ env.VAR }}` - environment variable
    ///
    /// Unknown keys render as the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        PLACEHOLDER
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                self.resolve_expression(expr)
            })
            .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(var_name) = expr.strip_prefix("env.") {
            return std::env::var(var_name).unwrap_or_default();
        }
        self.variables.get(expr).cloned().unwrap_or_default()
    }
}

/// An external command whose arguments may contain placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn render(&self, ctx: &InterpolationContext) -> CommandLine {
        CommandLine {
            program: ctx.interpolate(&self.program),
            args: self.args.iter().map(|a| ctx.interpolate(a)).collect(),
        }
    }

    /// Every placeholder key referenced by the template, `env.*` excluded.
    pub fn placeholders(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .flat_map(|part| {
                PLACEHOLDER
                    .captures_iter(part)
                    .map(|caps| caps[1].trim().to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|key| !key.starts_with("env."))
            .collect()
    }
}

/// A fully rendered command, ready to hand to a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}
