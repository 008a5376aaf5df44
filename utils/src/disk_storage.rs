//! Utilities for storing a struct in a file on the disk.
//! The struct should implement Serialize and Deserialize from serde.
//! Supported file formats are TOML and JSON. Writes go through a temporary
//! file that is renamed into place, so readers never see a partial file.

use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
    process,
};

use directories::BaseDirs;
use serde::{de::DeserializeOwned, Serialize};

pub enum FileFormat {
    TOML,
    JSON,
}

impl FileFormat {
    fn extension(&self) -> &'static str {
        match self {
            FileFormat::TOML => "toml",
            FileFormat::JSON => "json",
        }
    }
}

/// Directory holding the config file and, by default, the volume cache.
/// `INFLOW_HOME` overrides `~/.inflow`.
pub fn base_dir() -> crate::Result<PathBuf> {
    if let Some(home) = std::env::var_os("INFLOW_HOME") {
        return Ok(PathBuf::from(home));
    }
    let dirs = BaseDirs::new().ok_or(crate::Error::BaseDirsFailed)?;
    Ok(dirs.home_dir().join(".inflow"))
}

pub trait DiskStorageInterface
where
    Self: Sized + Debug + Default + Serialize + DeserializeOwned,
{
    const FILE_NAME: &'static str;
    const FORMAT: FileFormat;

    /// Get the path to the file
    fn path() -> crate::Result<PathBuf> {
        Ok(base_dir()?
            .join(Self::FILE_NAME)
            .with_extension(Self::FORMAT.extension()))
    }

    /// Load the content from the file if it exists otherwise return the default value
    fn load() -> crate::Result<Self> {
        let path = Self::path()?;
        Ok(read_file(&path, Self::FORMAT)?.unwrap_or_default())
    }

    /// Save content to a file, creating the directories and file as necessary
    fn save(&self) -> crate::Result<()> {
        write_file(&Self::path()?, Self::FORMAT, self)
    }
}

/// Reads and parses a file, `None` when it does not exist.
pub fn read_file<T: DeserializeOwned>(path: &Path, format: FileFormat) -> crate::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content =
        fs::read_to_string(path).map_err(|e| crate::Error::FileReadFailed(path.to_path_buf(), e))?;

    let parsed = match format {
        FileFormat::TOML => toml::from_str(&content)
            .map_err(|e| crate::Error::TomlParsingFailed(path.to_path_buf(), e))?,
        FileFormat::JSON => serde_json::from_str(&content)
            .map_err(|e| crate::Error::JsonParsingFailed(path.to_path_buf(), e))?,
    };
    Ok(Some(parsed))
}

pub fn write_file<T: Serialize + Debug>(
    path: &Path,
    format: FileFormat,
    value: &T,
) -> crate::Result<()> {
    let content = match format {
        FileFormat::TOML => toml::to_string_pretty(value)
            .map_err(|e| crate::Error::TomlFormattingFailed(format!("{value:?}"), e))?,
        FileFormat::JSON => serde_json::to_string_pretty(value)
            .map_err(|e| crate::Error::JsonFormattingFailed(format!("{value:?}"), e))?,
    };
    write_atomic(path, content.as_bytes())
}

/// Writes to a sibling temp file then renames it over `path`.
pub fn write_atomic(path: &Path, content: &[u8]) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| crate::Error::CreateDirAllFailed(parent.to_path_buf(), e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", process::id()));

    fs::write(&tmp, content).map_err(|e| crate::Error::FileWriteFailed(tmp.clone(), e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(crate::Error::FileRenameFailed(path.to_path_buf(), e));
    }
    Ok(())
}
