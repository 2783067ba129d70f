//! Projections
//!
//! A projection maps regions of the federated tree onto regions of one
//! source's tree. Each rule reads `"<federated path> => <source path>"`,
//! optionally followed by `$ <relative path>` exceptions that carve subtrees
//! out of the rule.

use crate::error::ConfigError;
use crate::graph::{Path, Segment};
use std::collections::BTreeSet;
use std::fmt;

const RULE_ARROW: &str = "=>";
const EXCEPTION_MARKER: char = '$';

/// One federated-to-source path mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    repository_path: Path,
    source_path: Path,
    exceptions: Vec<Path>,
}

impl PathRule {
    pub fn new(
        repository_path: Path,
        source_path: Path,
        exceptions: Vec<Path>,
    ) -> Result<Self, ConfigError> {
        let text = render(&repository_path, &source_path, &exceptions);
        if !repository_path.is_absolute() || !source_path.is_absolute() {
            return Err(ConfigError::InvalidRule {
                rule: text,
                reason: "federated and source paths must be absolute".to_string(),
            });
        }
        if let Some(bad) = exceptions.iter().find(|e| e.is_absolute() || e.is_empty()) {
            return Err(ConfigError::InvalidRule {
                rule: text,
                reason: format!("exception '{}' must be a non-empty relative path", bad),
            });
        }
        Ok(PathRule {
            repository_path,
            source_path,
            exceptions,
        })
    }

    /// Parse the textual rule form
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            rule: text.to_string(),
            reason,
        };
        let (repository, rest) = text
            .split_once(RULE_ARROW)
            .ok_or_else(|| invalid(format!("expected '{}' between the paths", RULE_ARROW)))?;
        let mut parts = rest.split(EXCEPTION_MARKER);
        let source = parts.next().unwrap_or_default();

        let repository_path = Path::parse(repository)
            .map_err(|e| invalid(format!("federated path: {}", e)))?;
        let source_path =
            Path::parse(source).map_err(|e| invalid(format!("source path: {}", e)))?;
        let exceptions = parts
            .map(|part| Path::parse(part).map_err(|e| invalid(format!("exception: {}", e))))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(repository_path, source_path, exceptions)
    }

    pub fn repository_path(&self) -> &Path {
        &self.repository_path
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn exceptions(&self) -> &[Path] {
        &self.exceptions
    }

    /// True when the rule maps the federated path
    pub fn includes(&self, repository_path: &Path) -> bool {
        match repository_path.relative_to(&self.repository_path) {
            Some(relative) => !self.is_excepted(&relative),
            None => false,
        }
    }

    fn is_excepted(&self, relative: &Path) -> bool {
        self.exceptions.iter().any(|exception| {
            relative.len() >= exception.len()
                && relative.segments()[..exception.len()] == *exception.segments()
        })
    }

    pub fn path_in_source(&self, repository_path: &Path) -> Option<Path> {
        let relative = repository_path.relative_to(&self.repository_path)?;
        if self.is_excepted(&relative) {
            return None;
        }
        Some(self.source_path.join(&relative))
    }

    pub fn path_in_repository(&self, source_path: &Path) -> Option<Path> {
        let relative = source_path.relative_to(&self.source_path)?;
        if self.is_excepted(&relative) {
            return None;
        }
        Some(self.repository_path.join(&relative))
    }
}

fn render(repository_path: &Path, source_path: &Path, exceptions: &[Path]) -> String {
    let mut text = format!("{} {} {}", repository_path, RULE_ARROW, source_path);
    for exception in exceptions {
        text.push_str(&format!(" {} {}", EXCEPTION_MARKER, exception));
    }
    text
}

impl fmt::Display for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(
            &self.repository_path,
            &self.source_path,
            &self.exceptions,
        ))
    }
}

/// The federated-to-source mapping of one source workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    source_name: String,
    workspace: String,
    rules: Vec<PathRule>,
    read_only: bool,
}

impl Projection {
    pub fn new(
        source_name: impl Into<String>,
        workspace: impl Into<String>,
        rules: Vec<PathRule>,
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        let source_name = source_name.into();
        if source_name.trim().is_empty() {
            return Err(ConfigError::MissingField("projection source".to_string()));
        }
        if rules.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "projection of '{}' has no rules",
                source_name
            )));
        }
        Ok(Projection {
            source_name,
            workspace: workspace.into(),
            rules,
            read_only,
        })
    }

    /// Build a projection from textual rules
    pub fn parse<S: AsRef<str>>(
        source_name: impl Into<String>,
        workspace: impl Into<String>,
        rules: &[S],
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .map(|r| PathRule::parse(r.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(source_name, workspace, rules, read_only)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// First rule that maps the federated path
    pub fn rule_for(&self, repository_path: &Path) -> Option<&PathRule> {
        self.rules.iter().find(|r| r.includes(repository_path))
    }

    /// Source-local paths equivalent to a federated path
    ///
    /// Usually one; empty when the projection does not cover the path, and
    /// several when the source is mounted more than once.
    pub fn paths_in_source(&self, repository_path: &Path) -> BTreeSet<Path> {
        self.rules
            .iter()
            .filter_map(|r| r.path_in_source(repository_path))
            .collect()
    }

    pub fn paths_in_repository(&self, source_path: &Path) -> BTreeSet<Path> {
        self.rules
            .iter()
            .filter_map(|r| r.path_in_repository(source_path))
            .collect()
    }

    pub fn covers(&self, repository_path: &Path) -> bool {
        self.rules.iter().any(|r| r.includes(repository_path))
    }

    /// Federated paths at which the projection's regions start
    ///
    /// Paths nested below another rule's path are left out.
    pub fn top_level_paths(&self) -> Vec<Path> {
        let mut paths: Vec<Path> = Vec::new();
        for rule in &self.rules {
            let candidate = rule.repository_path();
            let nested = self
                .rules
                .iter()
                .any(|other| other.repository_path().is_ancestor_of(candidate));
            if !nested && !paths.contains(candidate) {
                paths.push(candidate.clone());
            }
        }
        paths
    }

    /// Names of the children a federated ancestor of the projection must show
    ///
    /// Empty unless `repository_path` lies strictly above a top-level path.
    pub fn placeholder_children(&self, repository_path: &Path) -> Vec<Segment> {
        let mut children: Vec<Segment> = Vec::new();
        for top in self.top_level_paths() {
            if !repository_path.is_ancestor_of(&top) {
                continue;
            }
            if let Some(segment) = top.segments().get(repository_path.len()) {
                if !children.contains(segment) {
                    children.push(segment.clone());
                }
            }
        }
        children
    }

    /// True when the rules' federated regions do not overlap
    pub fn is_simple(&self) -> bool {
        self.rules.iter().enumerate().all(|(i, rule)| {
            self.rules.iter().skip(i + 1).all(|other| {
                !rule.repository_path().is_at_or_above(other.repository_path())
                    && !other.repository_path().is_at_or_above(rule.repository_path())
            })
        })
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [", self.source_name, self.workspace)?;
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", rule)?;
        }
        f.write_str("]")
    }
}
