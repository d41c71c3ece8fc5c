//! Destination root check

use std::path::Path;

use crate::error::ConfigurationError;

/// Require `destination_root` to be an existing directory.
///
/// Nothing is created; a missing root is a fatal configuration error.
pub fn validate_destination(destination_root: &Path) -> Result<(), ConfigurationError> {
    if destination_root.is_dir() {
        Ok(())
    } else {
        Err(ConfigurationError::MissingDestinationRoot(
            destination_root.to_path_buf(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_existing_directory_passes() {
        let dir = TempDir::new().unwrap();
        assert!(validate_destination(dir.path()).is_ok());
    }

    #[test]
    fn test_missing_root_names_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("comrot");
        let err = validate_destination(&missing).unwrap_err();
        assert!(err.to_string().contains("comrot"));
        assert!(!missing.exists(), "validation must not create the root");
    }

    #[test]
    fn test_regular_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            validate_destination(&file),
            Err(ConfigurationError::MissingDestinationRoot(_))
        ));
    }
}
