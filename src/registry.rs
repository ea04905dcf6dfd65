// Cantus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Discovery files for running session servers.
//!
//! Each running server writes `<root>/<id>.json` describing how to reach it, so that clients can
//! find sessions without being told their ports. The file is removed when the server stops.

use serde::{Deserialize, Serialize};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Overrides the directory that discovery files are kept in.
pub const STATE_DIR_VAR: &str = "CANTUS_STATE_DIR";

/// A specialized [`Result`] type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("accessing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed session file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The contents of a discovery file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub port: u16,
    pub pid: u32,
}

/// A directory of discovery files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRegistry {
    root: PathBuf,
}

impl SessionRegistry {
    pub fn new(root: impl Into<PathBuf>) -> SessionRegistry {
        SessionRegistry { root: root.into() }
    }

    /// The registry in `$CANTUS_STATE_DIR/repl-servers`, or under the system temporary
    /// directory when the variable is not set.
    pub fn from_env() -> SessionRegistry {
        let state_dir = env::var_os(STATE_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("cantus"));
        SessionRegistry::new(state_dir.join("repl-servers"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path of the discovery file for session `id`.
    pub fn state_file(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Writes the discovery file for a session, replacing any existing one.
    pub fn register(&self, info: &SessionInfo) -> Result<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|source| Error::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.state_file(&info.id);
        let json = serde_json::to_vec(info).map_err(|source| Error::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("registered session {} in {}", info.id, path.display());
        Ok(path)
    }

    /// Removes the discovery file for session `id`. Removing a missing file succeeds.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let path = self.state_file(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    /// Reads the discovery file for session `id`, if there is one.
    pub fn lookup(&self, id: &str) -> Result<Option<SessionInfo>> {
        read_info(&self.state_file(id))
    }

    /// Reads every discovery file, ordered by session id.
    ///
    /// Files that cannot be read are skipped.
    pub fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(Error::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    log::warn!("reading {}: {}", self.root.display(), err);
                    continue;
                }
            };
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match read_info(&path) {
                Ok(Some(info)) => sessions.push(info),
                Ok(None) => {}
                Err(err) => log::warn!("skipping session file: {}", err),
            }
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }
}

fn read_info(path: &Path) -> Result<Option<SessionInfo>> {
    let json = match fs::read(path) {
        Ok(json) => json,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::Io {
                path: path.to_owned(),
                source,
            })
        }
    };
    serde_json::from_slice(&json)
        .map(Some)
        .map_err(|source| Error::Json {
            path: path.to_owned(),
            source,
        })
}
