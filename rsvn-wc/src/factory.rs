//! Format detection, gating, and upgrade
//!
//! Probing is ordered newest first: the current positional format, then
//! the legacy XML format. Version gating refuses formats newer than
//! this client (upgrade the client) and prehistoric ones (check out
//! again); the one supported legacy format upgrades in place through
//! the journal, so an interrupted upgrade resumes like any other
//! replayed operation.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::area::{AdminArea, ADMIN_DIR_NAME};
use crate::entries::{EntryField, EntryPatch, WC_FORMAT, THIS_DIR};
use crate::error::{Result, WcError};
use crate::fsutil::{self, FileType};
use crate::log::{LogCommand, WORKING_TIMESTAMP};
use crate::props::PropertyDiff;
use crate::xml::{XmlArea, XML_FORMAT};

/// A successfully opened area in whichever format was found on disk.
pub enum OpenedArea {
    Current(AdminArea),
    Legacy(XmlArea),
}

/// Determine the administrative format under `path`. Returns 0 when
/// the directory carries no administrative area at all.
pub fn check_wc(path: &Path) -> Result<u32> {
    let version = read_version(path)?;
    if version == 0 {
        return Ok(0);
    }
    gate_version(path, version)?;
    Ok(version)
}

fn gate_version(path: &Path, version: u32) -> Result<()> {
    if version > WC_FORMAT {
        return Err(WcError::UnsupportedFormat(format!(
            "this client is too old to work with working copy '{}'; please get a newer client",
            path.display()
        )));
    }
    if version != WC_FORMAT && version != XML_FORMAT {
        return Err(WcError::UnsupportedFormat(format!(
            "working copy format {version} of '{}' is too old; please check out your working copy again",
            path.display()
        )));
    }
    Ok(())
}

/// The format file is authoritative; very old layouts kept the number
/// (or an XML document) in the entries file instead.
fn read_version(path: &Path) -> Result<u32> {
    let admin = path.join(ADMIN_DIR_NAME);
    for candidate in ["format", "entries"] {
        let file = admin.join(candidate);
        if fsutil::file_type(&file) != FileType::File {
            continue;
        }
        let content = fs::read_to_string(&file)?;
        let first = content.lines().next().unwrap_or("").trim();
        if first.starts_with('<') {
            return Ok(XML_FORMAT);
        }
        return first.parse().map_err(|_| {
            WcError::corrupt(path, format!("first line of '{candidate}' is not a number"))
        });
    }
    Ok(0)
}

/// Open whatever format is on disk, without converting it.
pub fn open(path: &Path) -> Result<OpenedArea> {
    match check_wc(path)? {
        0 => Err(WcError::NotDirectory(path.to_path_buf())),
        WC_FORMAT => Ok(OpenedArea::Current(AdminArea::new(path))),
        XML_FORMAT => Ok(OpenedArea::Legacy(XmlArea::new(path))),
        other => Err(WcError::UnsupportedFormat(format!(
            "unexpected working copy format {other}"
        ))),
    }
}

/// Open in the current format, upgrading a legacy area on the way.
pub fn open_current(path: &Path) -> Result<AdminArea> {
    match open(path)? {
        OpenedArea::Current(area) => Ok(area),
        OpenedArea::Legacy(old) => upgrade(old),
    }
}

/// Convert one legacy directory to the current format. The conversion
/// itself is journaled: entries move over directly, property stores are
/// re-staged, server-cached properties replay as wcprop commands, and
/// the format file rewrite is the journal's own upgrade-format step.
pub fn upgrade(old: XmlArea) -> Result<AdminArea> {
    if old.has_pending_log() {
        // An old client left unfinished work we cannot replay.
        return Err(WcError::Locked(old.root().to_path_buf()));
    }
    let root = old.root().to_path_buf();
    info!(dir = %root.display(), from = XML_FORMAT, to = WC_FORMAT, "upgrading working copy format");

    let table = old.entries()?;
    let names: Vec<String> = table
        .iter()
        .filter(|e| e.is_this_dir() || e.is_file())
        .map(|e| e.name.clone())
        .collect();

    let mut area = AdminArea::new(&root);
    if !fsutil::create_exclusive(&area.admin_file("lock"))? {
        return Err(WcError::Locked(root));
    }
    for sub in ["tmp", "tmp/props", "tmp/prop-base", "tmp/text-base"] {
        fs::create_dir_all(area.admin_file(sub))?;
    }
    area.prime_entries(table);

    let mut log = area.next_log();
    log.add(LogCommand::UpgradeFormat { format: WC_FORMAT });

    for name in &names {
        area.prime_base_properties(name, old.base_properties(name)?);
        area.prime_properties(name, old.properties(name)?);

        // Resolved at replay against the freshly staged property store,
        // or cleared when the store went away.
        let fields: EntryPatch =
            vec![(EntryField::PropTime, Some(WORKING_TIMESTAMP.to_string()))];
        log.add(LogCommand::ModifyEntry {
            name: name.clone(),
            fields,
        });

        let wcprops = old.wc_properties(name)?;
        if !wcprops.is_empty() {
            let diff: PropertyDiff = wcprops
                .into_iter()
                .map(|(k, v)| (k, Some(v)))
                .collect();
            log.add_changed_wc_properties(name, &diff);
        }
    }

    area.save_versioned_properties(&mut log)?;
    log.save()?;

    for path in old.obsolete_paths() {
        match fsutil::file_type(&path) {
            FileType::Dir => fsutil::delete_dir_all(&path)?,
            FileType::None => {}
            _ => fsutil::delete_if_exists(&path)?,
        }
    }

    area.run_logs()?;
    fsutil::delete_if_exists(&area.admin_file("lock"))?;
    debug!(dir = %area.root().display(), "upgrade complete");
    Ok(area)
}

/// Make sure a versioned directory for `url` exists at `dir`, creating
/// a fresh administrative area when the directory is new. An existing
/// area pointing somewhere else is an obstruction, as is one already at
/// a different revision.
pub fn ensure_versioned_directory(
    dir: &Path,
    url: &str,
    repos_root: Option<&str>,
    uuid: Option<&str>,
    revision: i64,
) -> Result<AdminArea> {
    if dir.exists() && !dir.is_dir() {
        return Err(WcError::ObstructedUpdate {
            path: dir.to_path_buf(),
            details: "it is not a directory".to_string(),
        });
    }
    if check_wc(dir)? == 0 {
        return AdminArea::create_versioned_directory(dir, url, repos_root, uuid, revision);
    }

    let mut area = open_current(dir)?;
    let entry = area
        .entry(THIS_DIR, true)?
        .ok_or_else(|| WcError::EntryNotFound(format!("missing default entry in '{}'", dir.display())))?;
    if entry.url.as_deref() != Some(url) {
        return Err(WcError::ObstructedUpdate {
            path: dir.to_path_buf(),
            details: format!(
                "it is already a working copy for '{}'",
                entry.url.as_deref().unwrap_or("")
            ),
        });
    }
    if entry.revision != revision && !entry.incomplete {
        return Err(WcError::ObstructedUpdate {
            path: dir.to_path_buf(),
            details: format!(
                "it is at revision {} instead of {revision}",
                entry.revision
            ),
        });
    }
    Ok(area)
}
