//! Configuration checks run before anything connects or starts watching.

pub mod paths;
pub mod semantic;

use std::fmt;

use crate::config::model::AppConfig;

/// How a failed check affects loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// The config is rejected.
    Error,
    /// Logged, the config is still used.
    Warning,
}

/// One problem found in the config.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    /// Dotted field path, e.g. `global.transcoder.renditions[1].height`.
    pub path: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Error, path.into(), message.into())
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationSeverity::Warning, path.into(), message.into())
    }

    fn new(severity: ValidationSeverity, path: String, message: String) -> Self {
        Self {
            severity,
            path,
            message,
            suggestion: None,
        }
    }

    /// Attaches a hint on how to fix the value.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Issues collected from every check, split by severity.
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an issue under its severity.
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            ValidationSeverity::Error => self.errors.push(issue),
            ValidationSeverity::Warning => self.warnings.push(issue),
        }
    }

    /// Takes over every issue from another report.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Warnings alone never make a config invalid.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationIssue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Checks config values, then the directories they name.
pub fn validate_config(config: &AppConfig) -> ValidationReport {
    let mut report = semantic::validate(config);
    report.merge(paths::validate(config));
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_are_split_by_severity() {
        let mut report = ValidationReport::new();
        report.push(ValidationIssue::warning("watch.file_patterns[0]", "matches encoder output"));
        assert!(report.is_valid());

        let mut other = ValidationReport::new();
        other.push(
            ValidationIssue::error("global.storage.bucket", "bucket must not be empty")
                .with_suggestion("set global.storage.bucket"),
        );
        report.merge(other);

        assert!(!report.is_valid());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(
            report.errors()[0].to_string(),
            "global.storage.bucket: bucket must not be empty (set global.storage.bucket)"
        );
    }
}
