//! File access for the data directory.
//!
//! Every path handed in by a caller is resolved lexically against the root and
//! rejected if it would leave it. Nothing touches the filesystem before that
//! check passes.

use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::records::{decode_csv, encode_csv, encode_row, Record};

#[derive(Debug, Clone)]
pub struct Gateway {
    root: PathBuf,
    data_dir: PathBuf,
}

impl Gateway {
    /// `data_dir` is relative to `root` and holds the collection files.
    pub fn new(root: impl Into<PathBuf>, data_dir: impl AsRef<str>) -> Result<Self> {
        let root = root.into();
        let data_dir = contain(Path::new(""), data_dir.as_ref())?;
        Ok(Self { root, data_dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative path of a file inside the data directory.
    pub fn data_path(&self, file_name: &str) -> String {
        self.data_dir.join(file_name).to_string_lossy().into_owned()
    }

    /// Resolves a root-relative path, failing closed on anything that escapes.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        contain(&self.root, relative).inspect_err(|e| warn!("Rejected path {:?}: {}", relative, e))
    }

    /// Reads a file; `None` when it does not exist.
    pub async fn read(&self, relative: &str) -> Result<Option<String>> {
        let path = self.resolve(relative)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!("Read {} ({} bytes)", path.display(), text.len());
                Ok(Some(text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the whole file. Content goes to a sibling temp file first and
    /// is renamed over the target.
    pub async fn save(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!("Saved {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    /// Appends one row to a CSV in the data directory.
    ///
    /// A missing or empty file is created with the row's keys as header.
    /// Otherwise values are aligned to the existing header; keys the header
    /// lacks are ignored and no column is ever added.
    pub async fn append_row(&self, file_name: &str, row: &Record) -> Result<()> {
        if !file_name.ends_with(".csv") {
            return Err(Error::InvalidInput("only CSV files are supported".to_string()));
        }
        if row.is_empty() {
            return Err(Error::InvalidInput("row has no fields".to_string()));
        }
        let data_root = self.root.join(&self.data_dir);
        let path = contain(&data_root, file_name)
            .inspect_err(|e| warn!("Rejected append path {:?}: {}", file_name, e))?;

        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let headers = decode_csv(&existing)?.headers;

        let mut chunk = String::new();
        let headers = if headers.iter().all(|h| h.is_empty()) {
            let headers: Vec<String> = row.keys().map(str::to_owned).collect();
            // Rewrites the file from scratch: it held nothing usable.
            let header_line = encode_csv(&headers, &[])?;
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, header_line).await?;
            headers
        } else {
            if !existing.ends_with('\n') {
                chunk.push('\n');
            }
            headers
        };

        chunk.push_str(&encode_row(&headers, row)?);

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await?;
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;

        info!("Appended row to {}", path.display());
        Ok(())
    }
}

/// Lexically joins `relative` onto `root`. Absolute paths, drive prefixes,
/// and `..` segments climbing above `root` are forbidden.
fn contain(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.trim().is_empty() || relative.contains('\0') {
        return Err(Error::InvalidInput(format!("invalid path {:?}", relative)));
    }

    let mut inner = PathBuf::new();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                inner.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::Forbidden(relative.to_string()));
                }
                inner.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Forbidden(relative.to_string()));
            }
        }
    }

    if depth == 0 {
        return Err(Error::Forbidden(relative.to_string()));
    }
    Ok(root.join(inner))
}
