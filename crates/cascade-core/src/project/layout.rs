//! Deterministic layout of one execution's scratch directory.
//!
//! ```text
//! <workspace_root>/<execution_id>/
//!   parameters.json
//!   <program files...>
//!   output/            <- files produced here are reported back
//! ```

use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct ProjectDir {
    execution_id: Uuid,
    root: PathBuf,
}

impl ProjectDir {
    /// Well-known name of the parameters file.
    pub const PARAMETERS_FILE: &'static str = "parameters.json";

    /// Subdirectory scanned for produced files after execution.
    pub const OUTPUT_DIR: &'static str = "output";

    pub fn new(workspace_root: PathBuf, execution_id: Uuid) -> Self {
        Self {
            root: workspace_root.join(execution_id.to_string()),
            execution_id,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(Self::OUTPUT_DIR)
    }

    pub async fn create(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.output_dir()).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<()> {
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        Ok(())
    }

    /// Write a file under the project root, creating parent directories.
    ///
    /// The path must stay inside the project directory.
    pub async fn write_file(&self, relative_path: &str, content: &[u8]) -> Result<()> {
        let relative = sanitize_relative(relative_path)?;
        let full = self.root.join(relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(())
    }

    /// Relative paths of files produced under the output convention.
    pub async fn list_output_files(&self) -> Result<Vec<String>> {
        let out = self.output_dir();
        if !out.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        collect(&out, &self.root, &mut found)?;
        found.sort();
        Ok(found)
    }
}

fn collect(dir: &Path, base: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect(&path, base, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.display().to_string());
        }
    }
    Ok(())
}

/// Reject absolute paths and parent-directory traversal.
fn sanitize_relative(path: &str) -> Result<PathBuf> {
    let relative = PathBuf::from(path);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative.as_os_str().is_empty() {
        return Err(EngineError::Project(format!(
            "illegal relative path '{path}'"
        )));
    }
    Ok(relative)
}
