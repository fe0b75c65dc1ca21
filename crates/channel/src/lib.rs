//! Shared-directory channel between the host application and the stage
//! controller. Each [`ChannelRole`] maps onto one file; a file's existence is
//! the signal and its content (if any) is a short text payload.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::Deserialize;
use shared::protocol::ChannelRole;
use thiserror::Error;

mod controller;
mod host;

pub use controller::ControllerChannel;
pub use host::HostChannel;

const STAGING_SUFFIX: &str = "tmp";

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel i/o failed on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> ChannelError + '_ {
        move |source| ChannelError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// How the host publishes a command descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffMode {
    /// Write the descriptor into the staging file and rename it onto the
    /// trigger path.
    #[default]
    Rename,
    /// Leave the descriptor in the staging file and create an empty trigger
    /// marker once it is complete.
    Marker,
}

/// Where the channel files live: `<dir>/<stem>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    dir: PathBuf,
    stem: String,
}

impl ChannelLayout {
    pub fn new(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, role: ChannelRole) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.stem, role.extension()))
    }

    fn staging_path(&self, role: ChannelRole) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{STAGING_SUFFIX}",
            self.stem,
            role.extension()
        ))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(ChannelError::io(&self.dir))
    }

    pub fn exists(&self, role: ChannelRole) -> Result<bool> {
        let path = self.path(role);
        path.try_exists().map_err(ChannelError::io(&path))
    }

    /// Writes `contents` next to the role's file and renames it into place so
    /// that a reader polling for the file never sees a partial payload.
    fn write_atomic(&self, role: ChannelRole, contents: &str) -> Result<()> {
        let staging = self.staging_path(role);
        write_file(&staging, contents)?;
        let target = self.path(role);
        fs::rename(&staging, &target).map_err(ChannelError::io(&target))
    }

    /// Same hand-off as [`Self::write_atomic`] but staged through another
    /// role's file, which is how the descriptor travels from `in` to `cmd`.
    fn write_atomic_as(
        &self,
        staging: ChannelRole,
        target: ChannelRole,
        contents: &str,
    ) -> Result<()> {
        let staging = self.path(staging);
        write_file(&staging, contents)?;
        let target = self.path(target);
        fs::rename(&staging, &target).map_err(ChannelError::io(&target))
    }

    fn write_plain(&self, role: ChannelRole, contents: &str) -> Result<()> {
        write_file(&self.path(role), contents)
    }

    fn read(&self, role: ChannelRole) -> Result<Option<String>> {
        let path = self.path(role);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ChannelError::io(&path)(err)),
        }
    }

    fn remove(&self, role: ChannelRole) -> Result<bool> {
        let path = self.path(role);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(ChannelError::io(&path)(err)),
        }
    }

    fn remove_all(&self, roles: &[ChannelRole]) -> Result<()> {
        for role in roles {
            if self.remove(*role)? {
                tracing::debug!(role = ?role, "removed stale channel file");
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = File::create(path).map_err(ChannelError::io(path))?;
    file.write_all(contents.as_bytes())
        .map_err(ChannelError::io(path))?;
    file.sync_all().map_err(ChannelError::io(path))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
