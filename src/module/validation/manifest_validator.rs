//! Manifest validation
//!
//! Structural checks run before a module is registered.

use tracing::{debug, warn};

use crate::module::registry::manifest::Manifest;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Manifest is valid
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Manifest validator
pub struct ManifestValidator {
    /// Maximum namespace length
    max_namespace_len: usize,
}

impl ManifestValidator {
    /// Create a new manifest validator
    pub fn new() -> Self {
        Self {
            max_namespace_len: 128,
        }
    }

    /// Validate a module manifest
    pub fn validate(&self, manifest: &Manifest) -> ValidationResult {
        let mut errors = Vec::new();

        if manifest.namespace.is_empty() {
            errors.push("Module namespace cannot be empty".to_string());
        } else if !self.is_valid_namespace(&manifest.namespace) {
            errors.push(format!(
                "Invalid module namespace: {} (must be alphanumeric with dots, dashes or underscores)",
                manifest.namespace
            ));
        }

        if manifest.name.trim().is_empty() {
            errors.push("Module name cannot be empty".to_string());
        }

        if manifest.version.is_empty() {
            errors.push("Module version cannot be empty".to_string());
        } else if semver::Version::parse(&manifest.version).is_err() {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                manifest.version
            ));
        }

        if manifest.package.is_empty() {
            errors.push("Module package cannot be empty".to_string());
        }

        for dependency in &manifest.dependencies {
            if dependency.namespace == manifest.namespace {
                errors.push(format!(
                    "Module {} cannot depend on itself",
                    manifest.namespace
                ));
            } else if !self.is_valid_namespace(&dependency.namespace) {
                errors.push(format!("Invalid dependency namespace: {}", dependency.namespace));
            }

            if semver::VersionReq::parse(&dependency.version).is_err() {
                errors.push(format!(
                    "Invalid dependency version requirement: {} (for dependency: {})",
                    dependency.version, dependency.namespace
                ));
            }
        }

        if errors.is_empty() {
            debug!("Manifest validation passed for module: {}", manifest.namespace);
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for module {}: {:?}",
                manifest.namespace, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    /// Validate namespace format
    #[inline]
    fn is_valid_namespace(&self, namespace: &str) -> bool {
        if namespace.is_empty() || namespace.len() > self.max_namespace_len {
            return false;
        }

        // `.` and `..` would escape data and staging directories
        if namespace.chars().all(|c| c == '.') {
            return false;
        }

        namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}
