//! Path validation for configuration directories.

use std::path::Path;

use crate::config::model::AppConfig;

use super::{ValidationIssue, ValidationReport};

/// Validates that all configured directories exist and are writable.
pub fn validate(config: &AppConfig) -> ValidationReport {
    let mut result = ValidationReport::new();

    validate_directory_writable(&config.global.upload_dir, "global.upload_dir", &mut result);

    if let Some(root) = &config.global.transcoder.output_root {
        validate_directory_writable(root, "global.transcoder.output_root", &mut result);

        // Output files matching the watch patterns would be resubmitted
        if config.watch.enabled && root.starts_with(&config.global.upload_dir) {
            result.push(
                ValidationIssue::warning(
                    "global.transcoder.output_root",
                    "Output root is inside the watched upload directory",
                )
                .with_suggestion("Keep encoded output outside the upload directory"),
            );
        }
    }

    result
}

/// Validates that a directory exists and is writable, creating it if missing.
fn validate_directory_writable(path: &Path, config_path: &str, result: &mut ValidationReport) {
    if !path.exists() {
        if let Err(e) = std::fs::create_dir_all(path) {
            result.push(
                ValidationIssue::error(
                    config_path,
                    format!("Cannot create directory '{}': {}", path.display(), e),
                )
                .with_suggestion("Check parent directory permissions"),
            );
        }
        return;
    }

    if !path.is_dir() {
        result.push(ValidationIssue::error(
            config_path,
            format!("Path is not a directory: '{}'", path.display()),
        ));
        return;
    }

    let test_file = path.join(".write_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&test_file);
        }
        Err(e) => {
            result.push(
                ValidationIssue::error(
                    config_path,
                    format!("Directory is not writable '{}': {}", path.display(), e),
                )
                .with_suggestion("Check directory permissions"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_upload_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let upload_dir = tmp.path().join("uploads").join("videos");
        let mut result = ValidationReport::new();

        validate_directory_writable(&upload_dir, "global.upload_dir", &mut result);

        assert!(result.is_valid());
        assert!(upload_dir.is_dir());
    }

    #[test]
    fn file_in_place_of_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let mut result = ValidationReport::new();

        validate_directory_writable(&file, "global.upload_dir", &mut result);

        assert_eq!(result.error_count(), 1);
    }
}
