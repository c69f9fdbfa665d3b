//! Migration file generation and discovery.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

use crate::error::{MigrateError, Result};

/// Produces a version stamp from the current UTC time.
#[must_use]
pub fn generate_version() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Extracts the version from a migration file name of the form
/// `version_<stamp>.rs`.
#[must_use]
pub fn version_from_file_name(name: &str) -> Option<String> {
    static FILE_NAME: OnceLock<Regex> = OnceLock::new();
    let re = FILE_NAME.get_or_init(|| Regex::new(r"^version_([0-9]{14})\.rs$").unwrap());
    re.captures(name).map(|caps| caps[1].to_string())
}

/// Lists the versions of all migration files in a directory, ascending.
pub fn discover_versions(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut versions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(version) = entry
            .file_name()
            .to_str()
            .and_then(version_from_file_name)
        {
            versions.push(version);
        }
    }
    versions.sort();
    Ok(versions)
}

/// Writes migration file skeletons into a directory.
pub struct MigrationWriter {
    dir: PathBuf,
}

impl MigrationWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes a skeleton for the given version, creating the directory as
    /// needed. Refuses to overwrite an existing file.
    pub fn write(&self, version: &str) -> Result<PathBuf> {
        crate::migration::validate_version(version)?;

        let path = self.dir.join(format!("version_{version}.rs"));
        if path.exists() {
            return Err(MigrateError::MigrationExists(path));
        }

        fs::create_dir_all(&self.dir)?;
        fs::write(&path, Self::template(version))?;
        Ok(path)
    }

    fn template(version: &str) -> String {
        let skeleton = r##"use strata_migrate::prelude::*;

pub struct Version@VERSION@;

#[async_trait]
impl Migration for Version@VERSION@ {
    fn version(&self) -> &str {
        "@VERSION@"
    }

    async fn up(&self, ctx: &MigrationContext) -> Result<()> {
        // Describe the schema change here, e.g.:
        //
        // let mut table = ctx.table("#__example");
        // table.add_column(Column::new("id", ColumnType::Int).identity());
        // table.create(ctx.platform()).await?;
        Ok(())
    }
}
"##;
        skeleton.replace("@VERSION@", version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_version_shape() {
        let version = generate_version();
        assert_eq!(version.len(), 14);
        assert!(version.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_version_from_file_name() {
        assert_eq!(
            version_from_file_name("version_20260829120000.rs"),
            Some("20260829120000".to_string())
        );
        assert_eq!(version_from_file_name("version_2026.rs"), None);
        assert_eq!(version_from_file_name("helpers.rs"), None);
    }

    #[test]
    fn test_write_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MigrationWriter::new(dir.path());

        let path = writer.write("20260829120000").unwrap();
        assert!(path.exists());

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("pub struct Version20260829120000;"));
        assert!(content.contains("\"20260829120000\""));
        // The commented example must carry the schema-object-prefix token.
        assert!(content.contains("ctx.table(\"#__example\")"));

        writer.write("20260829120001").unwrap();
        assert_eq!(
            discover_versions(dir.path()).unwrap(),
            vec!["20260829120000", "20260829120001"]
        );

        let err = writer.write("20260829120000").unwrap_err();
        assert!(matches!(err, MigrateError::MigrationExists(_)));
    }

    #[test]
    fn test_write_rejects_invalid_version() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MigrationWriter::new(dir.path());
        assert!(matches!(
            writer.write("nope").unwrap_err(),
            MigrateError::InvalidVersion(_)
        ));
    }
}
