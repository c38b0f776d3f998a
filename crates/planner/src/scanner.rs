use crate::types::{language_label, FileRecord, TokenResult};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 8 * 1_048_576; // 8 MB

/// A file discovered by the scanner, before token analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub language: String,
}

impl InventoryEntry {
    /// Attach a token result, producing the record the classifier consumes
    #[must_use]
    pub fn into_record(self, token_count: TokenResult) -> FileRecord {
        FileRecord::new(self.path, self.size, token_count)
            .relative_path(self.relative_path)
            .language(self.language)
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_file_size_bytes: u64,
    pub include_hidden: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            include_hidden: false,
        }
    }
}

/// Scanner for building the file inventory of a project
pub struct FileScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_options(root, ScanOptions::default())
    }

    pub fn with_options(root: impl AsRef<Path>, options: ScanOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options,
        }
    }

    /// Scan directory for source files (.gitignore aware), sorted by
    /// relative path so repeated scans yield the same order.
    pub fn scan(&self) -> Vec<InventoryEntry> {
        let mut entries = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(!self.options.include_hidden)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !FileScanner::is_ignored_scope(entry.path(), &root));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    let size = match entry.metadata() {
                        Ok(meta) => meta.len(),
                        Err(e) => {
                            log::warn!("Failed to stat {}: {e}", path.display());
                            continue;
                        }
                    };
                    if size > self.options.max_file_size_bytes {
                        log::debug!(
                            "Skipping oversized file {} ({} bytes > {})",
                            path.display(),
                            size,
                            self.options.max_file_size_bytes
                        );
                        continue;
                    }

                    if Self::is_noise_file(path) {
                        log::debug!("Skipping noisy artifact {}", path.display());
                        continue;
                    }

                    if !Self::is_source_file(path) {
                        continue;
                    }

                    entries.push(InventoryEntry {
                        path: path.to_path_buf(),
                        relative_path: self.relative_name(path),
                        size,
                        language: language_label(path),
                    });
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        log::info!("Found {} source files", entries.len());
        entries
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Check if file is a source or documentation file worth planning
    fn is_source_file(path: &Path) -> bool {
        if let Some(file_name) = path.file_name().and_then(|name| name.to_str()) {
            if matches!(file_name, "Dockerfile" | "Makefile" | "Justfile") {
                return true;
            }
        }

        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            let ext = ext.to_lowercase();
            return SUPPORTED_EXTENSIONS
                .iter()
                .any(|candidate| candidate == &ext);
        }

        false
    }

    fn is_ignored_scope(path: &Path, root: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            for component in relative.components() {
                if let std::path::Component::Normal(name) = component {
                    let lowered = name.to_string_lossy().to_lowercase();
                    if IGNORED_SCOPES.iter().any(|ignored| ignored == &lowered) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn is_noise_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| {
                NOISE_FILE_NAMES
                    .iter()
                    .any(|candidate| name.eq_ignore_ascii_case(candidate))
            })
    }
}

const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    // caches / builds
    ".cache",
    "node_modules",
    ".next",
    "build",
    "dist",
    "coverage",
    "target",
    ".venv",
    "__pycache__",
    // vendored code
    "vendor",
    "third_party",
    "third-party",
];

const NOISE_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
    "poetry.lock",
];

const SUPPORTED_EXTENSIONS: &[&str] = &[
    // General purpose languages
    "rs", "py", "pyw", "js", "mjs", "cjs", "ts", "tsx", "jsx", "java", "kt", "kts", "go", "c",
    "h", "cpp", "cc", "cxx", "hpp", "hh", "hxx", "cs", "rb", "swift", "php", "scala", "dart",
    "zig", "lua", "ex", "exs", "clj",
    // Scripts
    "sh", "bash", "zsh", "ps1",
    // Docs
    "md", "mdx", "rst", "txt",
    // Config / data / infra
    "yaml", "yml", "json", "toml", "ini", "cfg", "xml", "html", "css", "scss", "sql", "proto",
    "tf", "gradle",
];

#[cfg(test)]
mod tests {
    use super::FileScanner;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn skips_ignored_directories_and_lockfiles() {
        let temp = tempdir().unwrap();
        let deps = temp.path().join("node_modules").join("left-pad");
        fs::create_dir_all(&deps).unwrap();
        fs::write(deps.join("index.js"), b"module.exports = 1").unwrap();
        fs::write(temp.path().join("package-lock.json"), b"{}").unwrap();
        fs::write(temp.path().join("main.rs"), b"fn main() {}").unwrap();

        let entries = FileScanner::new(temp.path()).scan();

        let names: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(names, vec!["main.rs"]);
        assert_eq!(entries[0].language, "rs");
        assert_eq!(entries[0].size, 12);
    }

    #[test]
    fn scan_order_is_stable() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src").join("b.py"), b"x = 1").unwrap();
        fs::write(temp.path().join("src").join("a.py"), b"y = 2").unwrap();
        fs::write(temp.path().join("README.md"), b"# hi").unwrap();
        fs::write(temp.path().join("image.png"), b"\x89PNG").unwrap();

        let entries = FileScanner::new(temp.path()).scan();

        let names: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(names, vec!["README.md", "src/a.py", "src/b.py"]);
    }
}
