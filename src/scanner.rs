use crate::error::{Error, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Source discovery for a project tree.
///
/// Walks the root recursively and collects every `.rs` file, skipping `target`,
/// hidden directories and any configured exclusions. Files come back in
/// lexicographic path order so that every later stage sees a stable input.
///
/// # Example
///
/// ```no_run
/// use openapi_synth::scanner::FileScanner;
/// use std::path::PathBuf;
///
/// let scanner = FileScanner::new(PathBuf::from("./my-project"));
/// let result = scanner.scan().unwrap();
/// println!("Found {} Rust files", result.rust_files.len());
/// ```
pub struct FileScanner {
    root_path: PathBuf,
    exclude: Vec<String>,
}

/// Discovered files plus anything that could not be visited
pub struct ScanResult {
    /// Sorted
    pub rust_files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl FileScanner {
    pub fn new(root_path: PathBuf) -> Self {
        Self {
            root_path,
            exclude: Vec::new(),
        }
    }

    /// Skip directories or files with one of these names
    pub fn with_exclude(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Collect all `.rs` files below the root.
    ///
    /// Inaccessible entries become warnings and scanning continues.
    ///
    /// # Errors
    ///
    /// A configuration error when the root itself cannot be read.
    pub fn scan(&self) -> Result<ScanResult> {
        if let Err(e) = std::fs::read_dir(&self.root_path) {
            return Err(Error::config(format!(
                "cannot read root {}: {}",
                self.root_path.display(),
                e
            )));
        }

        let mut rust_files = Vec::new();
        let mut warnings = Vec::new();

        let walker = WalkDir::new(&self.root_path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_skipped(e.file_name().to_string_lossy().as_ref()));
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && path.extension().and_then(|s| s.to_str()) == Some("rs")
                    {
                        rust_files.push(path.to_path_buf());
                    }
                }
                Err(e) => {
                    let warning = format!("Failed to access path: {}", e);
                    warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }

        rust_files.sort();
        debug!(
            "Found {} Rust files under {}",
            rust_files.len(),
            self.root_path.display()
        );
        Ok(ScanResult {
            rust_files,
            warnings,
        })
    }

    fn is_skipped(&self, name: &str) -> bool {
        name.starts_with('.') || name == "target" || self.exclude.iter().any(|e| e == name)
    }
}
