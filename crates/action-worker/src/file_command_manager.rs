// File-based workflow commands (GITHUB_OUTPUT, GITHUB_ENV, GITHUB_PATH).
// A step writes to these files; they are read back once its stage finishes.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::execution_context::ExecutionContext;

pub const GITHUB_OUTPUT: &str = "GITHUB_OUTPUT";
pub const GITHUB_ENV: &str = "GITHUB_ENV";
pub const GITHUB_PATH: &str = "GITHUB_PATH";

/// Scratch files for one step stage. Removed on drop.
pub struct FileCommandManager {
    dir: TempDir,
    output_file: PathBuf,
    env_file: PathBuf,
    path_file: PathBuf,
}

impl FileCommandManager {
    /// Create empty command files under `temp_directory`.
    pub fn initialize(temp_directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(temp_directory).with_context(|| {
            format!("Failed to create temp directory '{}'", temp_directory.display())
        })?;
        let dir = tempfile::Builder::new()
            .prefix("_file_commands_")
            .tempdir_in(temp_directory)
            .context("Failed to create file command directory")?;

        let output_file = dir.path().join("output.txt");
        let env_file = dir.path().join("env.txt");
        let path_file = dir.path().join("path.txt");
        for file in [&output_file, &env_file, &path_file] {
            std::fs::write(file, "")
                .with_context(|| format!("Failed to create '{}'", file.display()))?;
        }

        Ok(Self {
            dir,
            output_file,
            env_file,
            path_file,
        })
    }

    /// Directory the files live in; usable for other per-stage scratch files.
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    /// Variables pointing the step at its command files.
    pub fn environment(&self) -> HashMap<String, String> {
        HashMap::from([
            (GITHUB_OUTPUT.to_string(), self.output_file.display().to_string()),
            (GITHUB_ENV.to_string(), self.env_file.display().to_string()),
            (GITHUB_PATH.to_string(), self.path_file.display().to_string()),
        ])
    }

    /// Read back what the step wrote and apply it to `context`.
    pub fn process(&self, context: &mut ExecutionContext) -> Result<()> {
        for (name, value) in parse_key_value_file(&read(&self.output_file)?)? {
            context.debug(&format!("Set output {}", name));
            context.outputs.insert(name, value);
        }

        for (name, value) in parse_key_value_file(&read(&self.env_file)?)? {
            context.debug(&format!("Set env {}", name));
            context.exported_environment.insert(name, value);
        }

        for line in read(&self.path_file)?.lines() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                context.debug(&format!("Prepend path {}", trimmed));
                context.added_path.push(trimmed.to_string());
            }
        }
        Ok(())
    }
}

fn read(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read '{}'", path.display())),
    }
}

/// Parse `NAME=VALUE` lines and `NAME<<DELIMITER` heredocs.
pub fn parse_key_value_file(content: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        let eq = line.find('=');
        let heredoc = line.find("<<");
        match (eq, heredoc) {
            (Some(eq_pos), h) if h.map_or(true, |h| eq_pos < h) => {
                let name = line[..eq_pos].trim();
                anyhow::ensure!(!name.is_empty(), "Invalid format '{}'. Name must not be empty", line);
                entries.push((name.to_string(), line[eq_pos + 1..].to_string()));
            }
            (_, Some(heredoc_pos)) => {
                let name = line[..heredoc_pos].trim();
                let delimiter = line[heredoc_pos + 2..].trim();
                anyhow::ensure!(
                    !name.is_empty() && !delimiter.is_empty(),
                    "Invalid format '{}'",
                    line
                );

                let mut value_lines = Vec::new();
                let mut closed = false;
                for value_line in lines.by_ref() {
                    if value_line.trim_end_matches('\r') == delimiter {
                        closed = true;
                        break;
                    }
                    value_lines.push(value_line);
                }
                anyhow::ensure!(
                    closed,
                    "Invalid value. Matching delimiter not found '{}'",
                    delimiter
                );
                entries.push((name.to_string(), value_lines.join("\n")));
            }
            _ => anyhow::bail!("Invalid format '{}'", line),
        }
    }

    Ok(entries)
}
