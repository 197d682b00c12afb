use cadence_core::{ContextConfig, Error, FileContext, Operation, PlannedChange, Result};
use std::fs as stdfs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs as tfs;

/// What applying one step did on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedChange {
    /// File written (created or overwritten)
    Written(PathBuf),
    /// File removed, or already absent
    Deleted(PathBuf),
    /// File moved
    Renamed {
        /// Old location
        from: PathBuf,
        /// New location
        to: PathBuf,
    },
}

/// Workspace rooted at a directory; applies file steps and reads context files.
#[derive(Debug, Clone)]
pub struct Workspace {
    root_path: PathBuf,
}

impl Workspace {
    /// Opens a workspace; the root is canonicalized when it exists.
    pub fn new(root_path: PathBuf) -> Self {
        let canonical = stdfs::canonicalize(&root_path).unwrap_or(root_path);
        Self {
            root_path: Self::normalize_root(&canonical),
        }
    }

    /// Strips the Windows verbatim prefix (\\?\) so paths compare as users write them.
    #[cfg(windows)]
    fn normalize_root(path: &Path) -> PathBuf {
        let path_string = path.display().to_string();
        let normalized: String = path_string
            .strip_prefix(r"\\?\")
            .map_or_else(|| path_string.clone(), ToString::to_string);
        PathBuf::from(normalized)
    }

    /// No-op normalization on non-Windows platforms.
    #[cfg(not(windows))]
    fn normalize_root(path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// Workspace root.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Resolves a command's working directory, `None` or blank meaning the root.
    ///
    /// # Errors
    /// Returns an error when the directory is absolute outside the root or
    /// climbs out of it through `..`.
    pub fn resolve_dir(&self, relative: Option<&str>) -> Result<PathBuf> {
        let Some(dir) = relative.map(str::trim).filter(|dir| !dir.is_empty()) else {
            return Ok(self.root_path.clone());
        };
        let inside = Self::normalize_to_root(&self.root_path, Path::new(dir))?;
        if !Self::is_safe_relative(&inside) {
            return Err(Error::Workspace(format!(
                "Working directory leaves the workspace: {dir}"
            )));
        }
        Ok(self.root_path.join(inside))
    }

    /// Applies one file step to disk.
    ///
    /// - create and modify write the full content, creating parents
    /// - delete ignores missing files
    /// - rename moves the file, creating the destination's parents
    ///
    /// # Errors
    /// Returns an error for terminal steps, unsafe paths, or filesystem failures.
    pub async fn apply_step(&self, step: &PlannedChange) -> Result<AppliedChange> {
        let relative = self.checked_relative(Path::new(&step.file_path))?;
        let abs_path = self.root_path.join(&relative);

        match &step.operation {
            Operation::Create(edit) | Operation::Modify(edit) => {
                if let Some(parent) = abs_path.parent() {
                    tfs::create_dir_all(parent).await?;
                }
                tfs::write(&abs_path, edit.content.as_deref().unwrap_or_default()).await?;
                tracing::debug!("Wrote {}", relative.display());
                Ok(AppliedChange::Written(relative))
            }
            Operation::Delete(_) => {
                Self::delete_file_if_exists(&abs_path).await?;
                tracing::debug!("Deleted {}", relative.display());
                Ok(AppliedChange::Deleted(relative))
            }
            Operation::Rename(edit) => {
                let target = edit.new_path.as_deref().ok_or_else(|| {
                    Error::Workspace(format!("Rename of {} has no target", relative.display()))
                })?;
                let target = self.checked_relative(Path::new(target))?;
                let abs_target = self.root_path.join(&target);
                if let Some(parent) = abs_target.parent() {
                    tfs::create_dir_all(parent).await?;
                }
                tfs::rename(&abs_path, &abs_target).await?;
                tracing::debug!("Renamed {} -> {}", relative.display(), target.display());
                Ok(AppliedChange::Renamed {
                    from: relative,
                    to: target,
                })
            }
            Operation::Terminal(command) => Err(Error::Workspace(format!(
                "Terminal step '{}' cannot be applied as a file change",
                command.command
            ))),
        }
    }

    /// Reads context files, truncating each and capping the count.
    ///
    /// Missing or unreadable files are skipped.
    pub async fn read_context_files<'path, I>(
        &self,
        paths: I,
        limits: &ContextConfig,
    ) -> Vec<FileContext>
    where
        I: IntoIterator<Item = &'path str>,
    {
        let mut files = Vec::new();
        for path in paths {
            if files.len() >= limits.max_context_files {
                tracing::debug!("Context file cap of {} reached", limits.max_context_files);
                break;
            }
            let Ok(relative) = self.checked_relative(Path::new(path)) else {
                tracing::debug!("Skipping unsafe context path {path}");
                continue;
            };
            match tfs::read_to_string(self.root_path.join(&relative)).await {
                Ok(content) => files.push(FileContext::new(
                    relative,
                    truncate_content(&content, limits.max_file_chars),
                )),
                Err(err) => tracing::debug!("Skipping context file {path}: {err}"),
            }
        }
        files
    }

    fn checked_relative(&self, path: &Path) -> Result<PathBuf> {
        let relative = Self::normalize_to_root(&self.root_path, path)?;
        if !Self::is_safe_relative(&relative) || relative.as_os_str().is_empty() {
            return Err(Error::Workspace(format!(
                "Unsafe relative path: {}",
                relative.display()
            )));
        }
        Ok(relative)
    }

    /// Ensure the given path is a safe relative path (no absolute, no parent components)
    fn is_safe_relative(path: &Path) -> bool {
        if path.is_absolute() {
            return false;
        }
        path.components()
            .all(|component| !matches!(component, Component::ParentDir | Component::Prefix(_)))
    }

    /// Convert an input path to a path relative to `root` if it is inside `root`.
    ///
    /// # Errors
    /// Returns an error when the absolute `input` is outside `root`.
    fn normalize_to_root(root: &Path, input: &Path) -> Result<PathBuf> {
        if input.is_absolute() {
            if let Ok(stripped) = input.strip_prefix(root) {
                return Ok(stripped.to_path_buf());
            }
            return Err(Error::Workspace(format!(
                "Absolute path outside workspace root: {} (root: {})",
                input.display(),
                root.display()
            )));
        }
        Ok(input.to_path_buf())
    }

    /// Delete the file at `abs_path` if it exists and is a file. Ignore missing files.
    ///
    /// # Errors
    /// Returns an error if metadata lookup or removal fails with anything but "not found".
    async fn delete_file_if_exists(abs_path: &Path) -> Result<()> {
        match tfs::metadata(abs_path).await {
            Ok(metadata) => {
                if metadata.is_file() {
                    tfs::remove_file(abs_path).await?;
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Keeps the first `max_chars` characters, appending a marker with the dropped count.
#[must_use]
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_owned();
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!("{kept}\n... [truncated {} chars]", total - max_chars)
}
