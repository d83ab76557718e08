//! Package registry
//!
//! A TOML lookup table mapping package names to routine-name prefixes and
//! file numbers:
//!
//! ```toml
//! [[package]]
//! name = "REGISTRATION"
//! prefixes = ["DG", "DGBT"]
//! files = ["2", "8"]
//! file_ranges = [{ low = "40", high = "45.9" }]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GraphError, Result};
use crate::model::{parse_file_number, FileRange, Package};
use crate::resolver::StageWriter;

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "package")]
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageEntry {
    name: String,
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    file_ranges: Vec<FileRange>,
}

#[derive(Debug, Clone, Default)]
pub struct PackageRegistry {
    pub packages: Vec<Package>,
}

impl PackageRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| GraphError::io(path.display(), e))?;
        Self::parse(&content).map_err(|e| match e {
            GraphError::RegistryError { message } => GraphError::RegistryError {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content).map_err(|e| GraphError::RegistryError {
            message: format!("Failed to parse registry: {}", e),
        })?;

        let mut names = BTreeSet::new();
        let mut packages = Vec::with_capacity(file.packages.len());
        for entry in file.packages {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                return Err(GraphError::RegistryError {
                    message: "package with an empty name".to_string(),
                });
            }
            if !names.insert(name.clone()) {
                return Err(GraphError::RegistryError {
                    message: format!("package {} is listed twice", name),
                });
            }
            for range in &entry.file_ranges {
                match (parse_file_number(&range.low), parse_file_number(&range.high)) {
                    (Some(low), Some(high)) if low <= high => {}
                    _ => {
                        return Err(GraphError::RegistryError {
                            message: format!(
                                "package {}: invalid file range {}..{}",
                                name, range.low, range.high
                            ),
                        })
                    }
                }
            }
            packages.push(Package {
                name,
                prefixes: entry
                    .prefixes
                    .iter()
                    .map(|p| p.trim().to_ascii_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect(),
                file_numbers: entry.files.iter().map(|f| f.trim().to_string()).collect(),
                file_ranges: entry.file_ranges,
            });
        }

        tracing::info!("[REGISTRY] {} packages", packages.len());
        Ok(Self { packages })
    }

    /// Register every package with the resolver
    pub fn register(&self, writer: &mut StageWriter<'_>) -> Result<()> {
        for package in &self.packages {
            writer.register_package(package)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }
}
