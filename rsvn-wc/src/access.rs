//! Working-copy access manager
//!
//! Operations that span directories open a set of admin areas up
//! front, optionally write-locked, and address them by path while they
//! work. A directory that has an entry in its parent but no usable
//! administrative area on disk is tracked as missing rather than
//! failing the whole open; callers probe for that state explicitly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::area::{AdminArea, Canceller};
use crate::entries::{self, THIS_DIR};
use crate::error::{Result, WcError};
use crate::factory;

enum Tracked {
    Open { area: AdminArea, locked: bool },
    Missing,
}

#[derive(Default)]
pub struct WcAccess {
    areas: BTreeMap<PathBuf, Tracked>,
    canceller: Option<Canceller>,
}

impl WcAccess {
    pub fn new() -> WcAccess {
        WcAccess::default()
    }

    pub fn set_canceller(&mut self, canceller: Canceller) {
        self.canceller = Some(canceller);
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(canceller) = &self.canceller {
            if canceller() {
                return Err(WcError::Cancelled);
            }
        }
        Ok(())
    }

    /// Open the admin area at `path`, and with nonzero depth its
    /// subdirectories too (negative depth means the whole subtree).
    /// Child directories that are versioned in their parent but absent
    /// on disk are recorded as missing. On failure everything opened so
    /// far is closed again.
    pub fn open(&mut self, path: &Path, write_lock: bool, depth: i32) -> Result<()> {
        if self.areas.contains_key(path) {
            return Err(WcError::Locked(path.to_path_buf()));
        }
        let result = self.open_inner(path.to_path_buf(), write_lock, depth, true);
        if result.is_err() {
            let _ = self.close(path);
        }
        result
    }

    fn open_inner(
        &mut self,
        path: PathBuf,
        write_lock: bool,
        depth: i32,
        is_root: bool,
    ) -> Result<()> {
        self.check_cancelled()?;
        let mut area = match factory::open_current(&path) {
            Ok(area) => area,
            Err(err) if err.is_missing_wc() && !is_root => {
                debug!(dir = %path.display(), "recording missing directory");
                self.areas.insert(path, Tracked::Missing);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if let Some(canceller) = &self.canceller {
            area.set_canceller(canceller.clone());
        }
        if write_lock {
            area.lock()?;
        }
        let child_names: Vec<String> = if depth != 0 {
            area.entries()?
                .iter()
                .filter(|e| !e.is_this_dir() && e.is_directory() && !e.is_hidden())
                .map(|e| e.name.clone())
                .collect()
        } else {
            Vec::new()
        };
        self.areas.insert(
            path.clone(),
            Tracked::Open {
                area,
                locked: write_lock,
            },
        );
        let child_depth = if depth > 0 { depth - 1 } else { depth };
        for name in child_names {
            self.open_inner(path.join(&name), write_lock, child_depth, false)?;
        }
        Ok(())
    }

    /// Open for an arbitrary target path: a versioned directory opens
    /// itself, anything else (a file, or nothing at all) opens its
    /// parent at depth zero. Returns the directory actually opened.
    pub fn probe_open(&mut self, path: &Path, write_lock: bool, depth: i32) -> Result<PathBuf> {
        let is_versioned_dir = path.is_dir() && factory::check_wc(path)? != 0;
        let (target, depth) = if is_versioned_dir {
            (path.to_path_buf(), depth)
        } else {
            let parent = path
                .parent()
                .ok_or_else(|| WcError::NotDirectory(path.to_path_buf()))?;
            (parent.to_path_buf(), 0)
        };
        self.open(&target, write_lock, depth)?;
        Ok(target)
    }

    /// Probe-open for `path` and hand back the area that covers it.
    pub fn probe_retrieve(
        &mut self,
        path: &Path,
        write_lock: bool,
        depth: i32,
    ) -> Result<&mut AdminArea> {
        let target = self.probe_open(path, write_lock, depth)?;
        self.retrieve(&target)
    }

    /// The opened area for `path`. A directory recorded as missing is
    /// an error here; callers that can tolerate it use `is_missing`.
    pub fn retrieve(&mut self, path: &Path) -> Result<&mut AdminArea> {
        match self.areas.get_mut(path) {
            Some(Tracked::Open { area, .. }) => Ok(area),
            Some(Tracked::Missing) => Err(WcError::NotDirectory(path.to_path_buf())),
            None => Err(WcError::NotLocked(path.to_path_buf())),
        }
    }

    pub fn is_missing(&self, path: &Path) -> bool {
        matches!(self.areas.get(path), Some(Tracked::Missing))
    }

    pub fn is_open(&self, path: &Path) -> bool {
        matches!(self.areas.get(path), Some(Tracked::Open { .. }))
    }

    /// Close everything at or under `path`, dropping write locks taken
    /// on open.
    pub fn close(&mut self, path: &Path) -> Result<()> {
        let keys: Vec<PathBuf> = self
            .areas
            .keys()
            .filter(|k| k.starts_with(path))
            .cloned()
            .collect();
        for key in keys {
            if let Some(Tracked::Open { mut area, locked }) = self.areas.remove(&key) {
                if locked {
                    area.unlock()?;
                }
            }
        }
        Ok(())
    }

    pub fn close_all(&mut self) -> Result<()> {
        let keys: Vec<PathBuf> = self.areas.keys().cloned().collect();
        for key in keys {
            if let Some(Tracked::Open { mut area, locked }) = self.areas.remove(&key) {
                if locked {
                    area.unlock()?;
                }
            }
        }
        Ok(())
    }

    /// A directory is a working-copy root when its parent knows nothing
    /// about it, or knows it under a different URL (a switched child).
    pub fn is_wc_root(&mut self, path: &Path) -> Result<bool> {
        let Some(parent) = path.parent() else {
            return Ok(true);
        };
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(true);
        };
        if factory::check_wc(parent)? == 0 {
            return Ok(true);
        }
        let mut parent_area = factory::open_current(parent)?;
        if parent_area.entry(name, true)?.is_none() {
            return Ok(true);
        }
        let parent_url = parent_area.entry(THIS_DIR, true)?.and_then(|e| e.url);
        let child_url = factory::open_current(path)?
            .entry(THIS_DIR, true)?
            .and_then(|e| e.url);
        match (parent_url, child_url) {
            (Some(parent_url), Some(child_url)) => {
                Ok(entries::url_join(&parent_url, name) != child_url)
            }
            _ => Ok(false),
        }
    }
}
