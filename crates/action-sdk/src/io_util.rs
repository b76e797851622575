use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::Path;
use std::{thread, time::Duration};
use walkdir::WalkDir;

/// Name of the ignore file honoured by [`IOUtil::copy_directory`].
pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// I/O utility functions.
pub struct IOUtil;

impl IOUtil {
    /// Recursively delete a directory with retry logic.
    ///
    /// Missing directories are not an error. Symlinks are unlinked, never followed.
    pub fn delete_directory(path: &Path) -> Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(_) => return Ok(()),
        };

        if meta.file_type().is_symlink() {
            return fs::remove_file(path)
                .with_context(|| format!("Failed to remove symlink '{}'", path.display()));
        }

        let max_retries = 3;
        let mut last_err = None;

        for attempt in 0..max_retries {
            match fs::remove_dir_all(path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    tracing::debug!(
                        "Failed to delete '{}' (attempt {}): {}",
                        path.display(),
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                    if attempt < max_retries - 1 {
                        thread::sleep(Duration::from_millis(100 * (attempt as u64 + 1)));
                    }
                }
            }
        }

        match last_err {
            Some(e) => Err(e).with_context(|| {
                format!(
                    "Failed to delete directory '{}' after {} retries",
                    path.display(),
                    max_retries
                )
            }),
            None => Ok(()),
        }
    }

    /// Whether `path` is a directory with at least one entry.
    pub fn is_populated_dir(path: &Path) -> bool {
        fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Copy the contents of `source` into `destination`, creating it if needed.
    ///
    /// When `respect_ignore_file` is set, entries matched by the patterns in
    /// `source/.gitignore` are skipped. Returns the number of files copied.
    pub fn copy_directory(source: &Path, destination: &Path, respect_ignore_file: bool) -> Result<usize> {
        anyhow::ensure!(
            source.is_dir(),
            "Source directory '{}' does not exist",
            source.display()
        );

        let rules = if respect_ignore_file {
            IgnoreRules::load(&source.join(IGNORE_FILE_NAME))?
        } else {
            IgnoreRules::default()
        };

        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create '{}'", destination.display()))?;

        let mut copied = 0usize;
        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                // A destination nested inside the source must not be copied into itself.
                if entry.path() == destination {
                    return false;
                }
                let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
                !rules.is_ignored(relative, entry.file_type().is_dir())
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk '{}'", source.display()))?;
            let relative = entry.path().strip_prefix(source)?;
            let target = destination.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create '{}'", target.display()))?;
            } else if entry.file_type().is_symlink() {
                copy_symlink(entry.path(), &target)?;
                copied += 1;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target).with_context(|| {
                    format!(
                        "Failed to copy '{}' to '{}'",
                        entry.path().display(),
                        target.display()
                    )
                })?;
                copied += 1;
            }
        }

        Ok(copied)
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source)?;
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(&link, target)
        .with_context(|| format!("Failed to create symlink '{}'", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)
        .map(|_| ())
        .with_context(|| format!("Failed to copy '{}'", source.display()))
}

/// A single ignore-file line compiled to a glob.
#[derive(Debug)]
struct IgnoreRule {
    pattern: Pattern,
    directory_only: bool,
    /// Rules without a `/` match the file name at any depth.
    basename_only: bool,
}

/// Subset of ignore-file semantics: comments, anchors, trailing `/` and
/// glob wildcards. Negated (`!`) lines are not supported and are skipped.
#[derive(Debug, Default)]
struct IgnoreRules {
    rules: Vec<IgnoreRule>,
}

impl IgnoreRules {
    fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read ignore file '{}'", path.display()))?;
        Ok(Self::parse(&content))
    }

    fn parse(content: &str) -> Self {
        let mut rules = Vec::new();
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                tracing::debug!("Negated ignore pattern '{}' is not supported", line);
                continue;
            }

            let directory_only = line.ends_with('/');
            let trimmed = line.trim_end_matches('/');
            let anchored = trimmed.starts_with('/');
            let body = trimmed.trim_start_matches('/');
            if body.is_empty() {
                continue;
            }

            match Pattern::new(body) {
                Ok(pattern) => rules.push(IgnoreRule {
                    pattern,
                    directory_only,
                    basename_only: !anchored && !body.contains('/'),
                }),
                Err(e) => tracing::debug!("Invalid ignore pattern '{}': {}", line, e),
            }
        }
        Self { rules }
    }

    fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative = relative.to_string_lossy().replace('\\', "/");

        self.rules.iter().any(|rule| {
            if rule.directory_only && !is_dir {
                return false;
            }
            if rule.basename_only {
                rule.pattern.matches_with(&file_name, options)
            } else {
                rule.pattern.matches_with(&relative, options)
            }
        })
    }
}
