//! Per-directory administrative area
//!
//! Every versioned directory carries a `.svn` subdirectory holding the
//! entries file, the three property stores, pristine text bases, the
//! journal, and the write-lock file. `AdminArea` is the handle to one
//! such directory: it caches parsed state lazily and flushes it back
//! with atomic tmp-then-rename writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::entries::{
    self, Entry, EntryField, EntryPatch, EntryTable, Schedule, ScheduleAction, INVALID_REVISION,
    THIS_DIR, WC_FORMAT,
};
use crate::error::{Result, WcError};
use crate::fsutil::{self, FileType};
use crate::log::{log_name, Log, LogCommand};
use crate::props::{self, svn_props, PropertyDiff, PropertyMap, VersionedProperties};
use crate::runner::LogRunner;
use crate::timeutil;
use crate::translate::{self, KeywordMap, TranslateOptions};

/// Name of the administrative subdirectory.
pub const ADMIN_DIR_NAME: &str = ".svn";

/// Presence of this marker file means the whole area is condemned and
/// cleanup removes it instead of replaying journals.
pub const KILLME: &str = "KILLME";

const ENTRIES_FILE: &str = "entries";
const FORMAT_FILE: &str = "format";
const LOCK_FILE: &str = "lock";
const ALL_WCPROPS_FILE: &str = "all-wcprops";

/// Cooperative cancellation hook; returning true aborts the current
/// operation with `WcError::Cancelled`.
pub type Canceller = Arc<dyn Fn() -> bool + Send + Sync>;

// ==================== Path helpers ====================

/// Journal commands address files by working-copy-relative paths, so
/// admin files are spelled with the `.svn/` prefix.
pub fn admin_path(rel: &str) -> String {
    format!("{ADMIN_DIR_NAME}/{rel}")
}

fn props_rel(name: &str, tmp: bool) -> String {
    let base = if name.is_empty() {
        "dir-props".to_string()
    } else {
        format!("props/{name}.svn-work")
    };
    if tmp { format!("tmp/{base}") } else { base }
}

fn prop_base_rel(name: &str, tmp: bool) -> String {
    let base = if name.is_empty() {
        "dir-prop-base".to_string()
    } else {
        format!("prop-base/{name}.svn-base")
    };
    if tmp { format!("tmp/{base}") } else { base }
}

fn text_base_rel(name: &str, tmp: bool) -> String {
    let base = format!("text-base/{name}.svn-base");
    if tmp { format!("tmp/{base}") } else { base }
}

// ==================== Admin area ====================

pub struct AdminArea {
    root: PathBuf,
    admin_dir: PathBuf,
    format: u32,
    entries: Option<EntryTable>,
    base_props: BTreeMap<String, VersionedProperties>,
    props: BTreeMap<String, VersionedProperties>,
    wc_props: BTreeMap<String, VersionedProperties>,
    wc_props_loaded: bool,
    canceller: Option<Canceller>,
}

impl AdminArea {
    pub fn new(root: &Path) -> AdminArea {
        AdminArea {
            root: root.to_path_buf(),
            admin_dir: root.join(ADMIN_DIR_NAME),
            format: WC_FORMAT,
            entries: None,
            base_props: BTreeMap::new(),
            props: BTreeMap::new(),
            wc_props: BTreeMap::new(),
            wc_props_loaded: false,
            canceller: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn set_canceller(&mut self, canceller: Canceller) {
        self.canceller = Some(canceller);
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if let Some(canceller) = &self.canceller {
            if canceller() {
                return Err(WcError::Cancelled);
            }
        }
        Ok(())
    }

    /// Resolve a journal-style relative name against the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        if name.is_empty() {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    pub fn admin_file(&self, rel: &str) -> PathBuf {
        self.admin_dir.join(rel)
    }

    pub fn props_file(&self, name: &str) -> PathBuf {
        self.admin_file(&props_rel(name, false))
    }

    pub fn prop_base_file(&self, name: &str) -> PathBuf {
        self.admin_file(&prop_base_rel(name, false))
    }

    pub fn text_base_file(&self, name: &str) -> PathBuf {
        self.admin_file(&text_base_rel(name, false))
    }

    // ==================== Locking ====================

    pub fn is_versioned(&self) -> bool {
        self.admin_dir.is_dir() && self.admin_file(ENTRIES_FILE).is_file()
    }

    pub fn is_locked(&self) -> Result<bool> {
        match fsutil::file_type(&self.admin_file(LOCK_FILE)) {
            FileType::File => Ok(true),
            FileType::None => Ok(false),
            _ => Err(WcError::corrupt(
                &self.root,
                "lock file is not a regular file",
            )),
        }
    }

    /// Take the write lock. Returns false when the directory is not
    /// versioned at all.
    pub fn lock(&mut self) -> Result<bool> {
        self.lock_wait(0)
    }

    /// Like `lock`, but retries once per second for up to
    /// `timeout_secs` before giving up.
    pub fn lock_wait(&mut self, timeout_secs: u64) -> Result<bool> {
        if !self.is_versioned() {
            return Ok(false);
        }
        let lock_file = self.admin_file(LOCK_FILE);
        let mut remaining = timeout_secs;
        loop {
            if fsutil::create_exclusive(&lock_file)? {
                return Ok(true);
            }
            if remaining == 0 {
                return Err(WcError::Locked(self.root.clone()));
            }
            std::thread::sleep(Duration::from_secs(1));
            remaining -= 1;
        }
    }

    /// Drop the write lock. Returns false without unlocking when
    /// unfinished journals or a KILLME marker remain.
    pub fn unlock(&mut self) -> Result<bool> {
        let lock_file = self.admin_file(LOCK_FILE);
        if fsutil::file_type(&lock_file) == FileType::None {
            return Ok(true);
        }
        if self.admin_file(KILLME).exists() || Log::new(&self.admin_dir, 0).exists() {
            return Ok(false);
        }
        fsutil::delete_if_exists(&lock_file)?;
        Ok(true)
    }

    // ==================== Entries ====================

    pub fn entries(&mut self) -> Result<&mut EntryTable> {
        if self.entries.is_none() {
            let path = self.admin_file(ENTRIES_FILE);
            let table = if path.is_file() {
                let content = fs::read_to_string(&path)?;
                EntryTable::parse(&content, &self.root)?
            } else {
                EntryTable::new()
            };
            self.entries = Some(table);
        }
        Ok(self.entries.get_or_insert_with(EntryTable::new))
    }

    /// Look up one entry by name, cloned out of the table. Hidden
    /// entries are reported only when `show_hidden` is set.
    pub fn entry(&mut self, name: &str, show_hidden: bool) -> Result<Option<Entry>> {
        match self.entries()?.get(name) {
            Some(entry) if !show_hidden && entry.is_hidden() => Ok(None),
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    pub fn add_entry(&mut self, name: &str) -> Result<&mut Entry> {
        let table = self.entries()?;
        if !table.contains(name) {
            table.insert(Entry::new(name));
        }
        table
            .get_mut(name)
            .ok_or_else(|| WcError::EntryNotFound(name.to_string()))
    }

    pub fn delete_entry(&mut self, name: &str) -> Result<bool> {
        Ok(self.entries()?.remove(name).is_some())
    }

    /// Patch one entry. Schedule changes are folded against the current
    /// state first unless `force` is set; folding may remove the entry
    /// outright (deleting a pending addition).
    pub fn modify_entry(
        &mut self,
        name: &str,
        patch: &EntryPatch,
        save: bool,
        force: bool,
    ) -> Result<()> {
        let mut patch: EntryPatch = patch.clone();
        let mut removed = false;

        if let Some(idx) = patch.iter().position(|(f, _)| *f == EntryField::Schedule) {
            if !force {
                let requested = match patch[idx].1.as_deref() {
                    None | Some("") => None,
                    Some(text) => {
                        Some(Schedule::parse(text).ok_or_else(|| WcError::EntryAttributeInvalid {
                            name: name.to_string(),
                            attribute: "schedule".to_string(),
                            value: text.to_string(),
                        })?)
                    }
                };
                match self.entries()?.fold_scheduling(name, requested)? {
                    ScheduleAction::RemoveEntry => {
                        self.entries()?.remove(name);
                        removed = true;
                    }
                    ScheduleAction::Skip => {
                        patch.remove(idx);
                    }
                    ScheduleAction::Apply(schedule) => {
                        patch[idx].1 = schedule.map(|s| s.as_str().to_string());
                    }
                }
            }
        }

        if !removed {
            let table = self.entries()?;
            if !table.contains(name) {
                table.insert(Entry::new(name));
            }
            let schedule_changed = patch.iter().any(|(f, _)| *f == EntryField::Schedule);
            let root = table.this_dir().cloned();
            let entry = table
                .get_mut(name)
                .ok_or_else(|| WcError::EntryNotFound(name.to_string()))?;
            for (field, value) in &patch {
                entries::apply_field(entry, *field, value.as_deref())?;
            }
            if !entry.is_this_dir() && entry.is_file() {
                if let Some(root) = root {
                    fill_from_root(entry, &root);
                }
            }
            if schedule_changed && entry.is_scheduled_for_deletion() {
                entry.copied = false;
                entry.copyfrom_rev = INVALID_REVISION;
                entry.copyfrom_url = None;
            }
        }

        if save {
            self.save_entries()?;
        }
        Ok(())
    }

    /// Flush the cached entries table. Requires the write lock and a
    /// valid directory entry whose URL sits under the repository root.
    pub fn save_entries(&mut self) -> Result<()> {
        let Some(table) = self.entries.as_ref() else {
            return Ok(());
        };
        if !self.is_locked()? {
            return Err(WcError::NotLocked(self.root.clone()));
        }
        let root = table.validate_this_dir(&self.root)?;
        if let (Some(repos), Some(url)) = (&root.repos_root, &root.url) {
            if !entries::is_url_ancestor(repos, url) {
                return Err(WcError::corrupt(
                    &self.root,
                    format!("repository root '{repos}' is not an ancestor of URL '{url}'"),
                ));
            }
        }
        let content = table.serialize(self.format)?;
        let target = self.admin_file(ENTRIES_FILE);
        fsutil::write_via_tmp(
            &self.admin_file("tmp/entries"),
            &target,
            content.as_bytes(),
        )?;
        fsutil::set_readonly(&target, true)?;
        debug!(dir = %self.root.display(), entries = table.len(), "saved entries");
        Ok(())
    }

    // ==================== Properties ====================

    fn read_prop_file(path: &Path) -> Result<PropertyMap> {
        if fsutil::file_type(path) != FileType::File {
            return Ok(PropertyMap::new());
        }
        let data = fs::read(path)?;
        props::parse_hash(&data, path)
    }

    /// Pristine properties of one entry.
    pub fn base_properties(&mut self, name: &str) -> Result<&mut VersionedProperties> {
        if !self.base_props.contains_key(name) {
            let map = Self::read_prop_file(&self.prop_base_file(name))?;
            self.base_props
                .insert(name.to_string(), VersionedProperties::new(map));
        }
        Ok(self
            .base_props
            .entry(name.to_string())
            .or_insert_with(VersionedProperties::empty))
    }

    /// Working properties of one entry. When no local modifications are
    /// recorded the base store doubles as the working store.
    pub fn properties(&mut self, name: &str) -> Result<&mut VersionedProperties> {
        if !self.props.contains_key(name) {
            let map = if self.has_prop_modifications(name)? {
                Self::read_prop_file(&self.props_file(name))?
            } else if let Some(base) = self.base_props.get(name) {
                base.as_map().clone()
            } else if self.has_properties(name)? {
                Self::read_prop_file(&self.prop_base_file(name))?
            } else {
                PropertyMap::new()
            };
            self.props
                .insert(name.to_string(), VersionedProperties::new(map));
        }
        Ok(self
            .props
            .entry(name.to_string())
            .or_insert_with(VersionedProperties::empty))
    }

    /// Server-cached properties of one entry, or None when the entry
    /// does not exist. The whole store loads on first touch.
    pub fn wc_properties(&mut self, name: &str) -> Result<Option<&mut VersionedProperties>> {
        if self.entry(name, true)?.is_none() {
            return Ok(None);
        }
        self.load_wc_props()?;
        Ok(Some(
            self.wc_props
                .entry(name.to_string())
                .or_insert_with(VersionedProperties::empty),
        ))
    }

    fn load_wc_props(&mut self) -> Result<()> {
        if self.wc_props_loaded {
            return Ok(());
        }
        let path = self.admin_file(ALL_WCPROPS_FILE);
        if fsutil::file_type(&path) == FileType::File {
            let data = fs::read(&path)?;
            for (name, map) in props::parse_all_wcprops(&data, &path)? {
                self.wc_props
                    .entry(name)
                    .or_insert_with(|| VersionedProperties::new(map));
            }
        }
        self.wc_props_loaded = true;
        Ok(())
    }

    /// One working property value. Entries record which cachable
    /// properties are present, so absent ones resolve without touching
    /// any property file.
    pub fn property_value(&mut self, name: &str, propname: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entry(name, true)? {
            if entry.is_cachable_property(propname) && !entry.is_present_property(propname) {
                return Ok(None);
            }
        }
        Ok(self.properties(name)?.get(propname).map(str::to_string))
    }

    pub fn has_prop_modifications(&mut self, name: &str) -> Result<bool> {
        Ok(self
            .entry(name, true)?
            .map(|e| e.has_prop_mods)
            .unwrap_or(false))
    }

    pub fn has_properties(&mut self, name: &str) -> Result<bool> {
        Ok(self
            .entry(name, true)?
            .map(|e| e.has_props)
            .unwrap_or(false))
    }

    /// Stage every modified property store into `log`: entry flag
    /// updates are journaled, new property files land in `tmp/` with
    /// journaled moves into place. Nothing takes effect until the log
    /// is saved and replayed.
    pub fn save_versioned_properties(&mut self, log: &mut Log) -> Result<()> {
        let mut processed: BTreeSet<String> = BTreeSet::new();

        let working_names: Vec<String> = self
            .props
            .iter()
            .filter(|(_, p)| p.is_modified())
            .map(|(n, _)| n.clone())
            .collect();
        for name in &working_names {
            let Some(working) = self.props.get(name).cloned() else {
                continue;
            };
            let base = self.base_properties(name)?.clone();
            let diff = base.compare_to(&working);
            push_prop_flags(log, name, &working, &diff);

            let dst = admin_path(&props_rel(name, false));
            if diff.is_empty() {
                // Working props match the base: the overlay file must go.
                log.add(LogCommand::Delete { name: dst });
            } else {
                self.stage_prop_file(log, &props_rel(name, true), dst, working.as_map())?;
            }
            processed.insert(name.clone());
            if let Some(p) = self.props.get_mut(name) {
                p.set_modified(false);
            }
        }

        let base_names: Vec<String> = self
            .base_props
            .iter()
            .filter(|(_, p)| p.is_modified())
            .map(|(n, _)| n.clone())
            .collect();
        for name in &base_names {
            if !processed.contains(name) {
                let working = self.properties(name)?.clone();
                let Some(base) = self.base_props.get(name).cloned() else {
                    continue;
                };
                let diff = base.compare_to(&working);
                push_prop_flags(log, name, &working, &diff);
            }
            let Some(base) = self.base_props.get(name).cloned() else {
                continue;
            };
            let dst = admin_path(&prop_base_rel(name, false));
            if base.is_empty() {
                log.add(LogCommand::Delete { name: dst });
            } else {
                self.stage_prop_file(log, &prop_base_rel(name, true), dst, base.as_map())?;
            }
            if let Some(p) = self.base_props.get_mut(name) {
                p.set_modified(false);
            }
        }
        Ok(())
    }

    fn stage_prop_file(
        &self,
        log: &mut Log,
        tmp_rel: &str,
        dst: String,
        map: &PropertyMap,
    ) -> Result<()> {
        let tmp_abs = self.admin_file(tmp_rel);
        if let Some(parent) = tmp_abs.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::new();
        props::write_hash(&mut buf, map);
        fsutil::delete_if_exists(&tmp_abs)?;
        fs::write(&tmp_abs, &buf)?;
        log.add(LogCommand::Move {
            name: admin_path(tmp_rel),
            dest: dst.clone(),
        });
        log.add(LogCommand::Readonly { name: dst });
        Ok(())
    }

    /// Flush the server-cached property store. All blocks rewrite in
    /// one pass; a store with no values at all deletes the file.
    pub fn save_wc_properties(&mut self) -> Result<()> {
        if !self.wc_props_loaded && self.wc_props.is_empty() {
            return Ok(());
        }
        let mut all: BTreeMap<String, PropertyMap> = BTreeMap::new();
        for (name, props) in &self.wc_props {
            all.insert(name.clone(), props.as_map().clone());
        }
        let target = self.admin_file(ALL_WCPROPS_FILE);
        match props::write_all_wcprops(&all) {
            Some(bytes) => {
                fsutil::write_via_tmp(&self.admin_file("tmp/all-wcprops"), &target, &bytes)?;
                fsutil::set_readonly(&target, true)?;
            }
            None => fsutil::delete_if_exists(&target)?,
        }
        for props in self.wc_props.values_mut() {
            props.set_modified(false);
        }
        Ok(())
    }

    // ==================== Translation ====================

    /// Build the translation settings for one file from its working
    /// properties and entry fields.
    pub fn translate_options(&mut self, name: &str, expand: bool) -> Result<TranslateOptions> {
        let (eol_style, keywords_spec) = {
            let props = self.properties(name)?;
            (
                props.get(svn_props::EOL_STYLE).map(str::to_string),
                props.get(svn_props::KEYWORDS).map(str::to_string),
            )
        };
        let entry = self.entry(name, true)?;
        let eol = eol_style
            .as_deref()
            .and_then(|style| {
                if expand {
                    translate::working_eol(style)
                } else {
                    translate::base_eol(style)
                }
            })
            .map(|bytes| bytes.to_vec());
        let keywords = match keywords_spec {
            Some(spec) => {
                let entry = entry.unwrap_or_else(|| Entry::new(name));
                translate::compute_keywords(
                    &spec,
                    entry.url.as_deref(),
                    entry.committed_author.as_deref(),
                    entry.committed_date.as_deref(),
                    (entry.committed_rev >= 0).then_some(entry.committed_rev),
                    expand,
                )
            }
            None => KeywordMap::new(),
        };
        Ok(TranslateOptions { eol, keywords })
    }

    // ==================== Modification detection ====================

    /// Detect local text modifications. The recorded text-time short
    /// circuits the common unmodified case; comparison detranslates the
    /// working file first so EOL and keyword differences don't count.
    /// With `force_comparison` the base checksum is verified as well.
    pub fn has_text_modifications(&mut self, name: &str, force_comparison: bool) -> Result<bool> {
        let Some(entry) = self.entry(name, false)? else {
            return Ok(false);
        };
        if entry.is_directory() {
            return Ok(false);
        }
        let working = self.file(name);
        if !force_comparison {
            if let (Some(text_time), Ok(file_secs)) =
                (&entry.text_time, timeutil::mtime_seconds(&working))
            {
                if timeutil::date_to_seconds(text_time) == Some(file_secs) {
                    return Ok(false);
                }
            }
        }
        if fsutil::file_type(&working) != FileType::File {
            return Ok(false);
        }
        let base = self.text_base_file(name);
        if fsutil::file_type(&base) != FileType::File {
            return Ok(true);
        }

        let tmp = self.admin_file(&text_base_rel(name, true));
        let options = self.translate_options(name, false)?;
        translate::translate_file(&working, &tmp, &options)?;
        let equals = fsutil::contents_equal(&base, &tmp)?;
        fsutil::delete_if_exists(&tmp)?;

        if force_comparison {
            if let Some(expected) = &entry.checksum {
                let actual = fsutil::md5_file(&base)?;
                if &actual != expected {
                    return Err(WcError::CorruptTextBase {
                        path: base,
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        if equals && self.is_locked()? {
            // Repair the fast path for the next caller.
            let stamp = timeutil::mtime_string(&working)?;
            if let Some(e) = self.entries()?.get_mut(name) {
                e.text_time = Some(stamp);
            }
            self.save_entries()?;
        }
        Ok(!equals)
    }

    /// Drop one file from version control: its entry, pristine base,
    /// and property stores go away. The working file itself is kept
    /// when it carries local modifications.
    pub fn remove_from_revision_control(
        &mut self,
        name: &str,
        delete_working_file: bool,
    ) -> Result<()> {
        let has_mods = if delete_working_file {
            self.has_text_modifications(name, false).unwrap_or(false)
        } else {
            false
        };
        fsutil::delete_if_exists(&self.text_base_file(name))?;
        fsutil::delete_if_exists(&self.prop_base_file(name))?;
        fsutil::delete_if_exists(&self.props_file(name))?;
        self.entries()?.remove(name);
        self.props.remove(name);
        self.base_props.remove(name);
        self.load_wc_props()?;
        self.wc_props.remove(name);
        if delete_working_file && !has_mods {
            fsutil::delete_if_exists(&self.file(name))?;
        }
        Ok(())
    }

    // ==================== Journal ====================

    /// The next unused journal slot.
    pub fn next_log(&self) -> Log {
        let mut id = 0;
        loop {
            let log = Log::new(&self.admin_dir, id);
            if !log.exists() {
                return log;
            }
            id += 1;
        }
    }

    /// Replay every pending journal in order. On failure the failing
    /// journal is rewritten to hold only its unexecuted tail, finished
    /// journals are deleted, and survivors are renumbered from zero so
    /// a later replay resumes exactly where this one stopped.
    pub fn run_logs(&mut self) -> Result<()> {
        let mut runner = LogRunner::new();
        let mut processed: Vec<u32> = Vec::new();
        let mut index: u32 = 0;
        match self.run_logs_inner(&mut runner, &mut processed, &mut index) {
            Ok(()) => {
                runner.log_completed(self)?;
                for id in &processed {
                    Log::new(&self.admin_dir, *id).delete()?;
                }
                Ok(())
            }
            Err(err) => {
                let _ = runner.log_failed(self);
                for id in &processed {
                    let _ = Log::new(&self.admin_dir, *id).delete();
                }
                self.renumber_logs(index);
                Err(err)
            }
        }
    }

    fn run_logs_inner(
        &mut self,
        runner: &mut LogRunner,
        processed: &mut Vec<u32>,
        index: &mut u32,
    ) -> Result<()> {
        loop {
            self.check_cancelled()?;
            let log = Log::new(&self.admin_dir, *index);
            if !log.exists() {
                return Ok(());
            }
            debug!(dir = %self.root.display(), log = %log.path().display(), "replaying journal");
            let commands = log.read_commands()?;
            for (pos, command) in commands.iter().enumerate() {
                if let Err(err) = runner.run_command(self, command) {
                    let _ = log.save_commands(&commands[pos..]);
                    return Err(err);
                }
            }
            processed.push(*index);
            *index += 1;
        }
    }

    fn renumber_logs(&self, from: u32) {
        if from == 0 {
            return;
        }
        let mut new_id = 0;
        let mut old_id = from;
        loop {
            let old = self.admin_file(&log_name(old_id));
            if fsutil::file_type(&old) != FileType::File {
                break;
            }
            let _ = fsutil::rename(&old, &self.admin_file(&log_name(new_id)));
            new_id += 1;
            old_id += 1;
        }
    }

    /// Restore consistency after an interrupted operation: a condemned
    /// area is removed outright, otherwise pending journals replay and
    /// stray tmp files are swept.
    pub fn cleanup(&mut self) -> Result<()> {
        self.check_cancelled()?;
        if self.admin_file(KILLME).exists() {
            fsutil::delete_dir_all(&self.admin_dir)?;
            return Ok(());
        }
        if Log::new(&self.admin_dir, 0).exists() {
            self.run_logs()?;
        }
        let tmp = self.admin_file("tmp");
        if tmp.is_dir() {
            sweep_dir(&tmp)?;
        }
        Ok(())
    }

    // ==================== Creation and upgrade ====================

    /// Lay down a fresh administrative area for `dir` and record its
    /// directory entry. With a positive revision the entry is marked
    /// incomplete until the first update fills it in.
    pub fn create_versioned_directory(
        dir: &Path,
        url: &str,
        repos_root: Option<&str>,
        uuid: Option<&str>,
        revision: i64,
    ) -> Result<AdminArea> {
        fs::create_dir_all(dir)?;
        let mut area = AdminArea::new(dir);
        fs::create_dir_all(&area.admin_dir)?;
        fsutil::create_exclusive(&area.admin_file(LOCK_FILE))?;
        for sub in [
            "tmp",
            "tmp/props",
            "tmp/prop-base",
            "tmp/text-base",
            "props",
            "prop-base",
            "text-base",
        ] {
            fs::create_dir_all(area.admin_file(sub))?;
        }
        area.write_format_file()?;

        let mut root_entry = Entry::new(THIS_DIR);
        root_entry.kind = Some(crate::entries::NodeKind::Dir);
        root_entry.url = Some(url.to_string());
        root_entry.repos_root = repos_root.map(str::to_string);
        root_entry.uuid = uuid.map(str::to_string);
        root_entry.revision = revision.max(0);
        root_entry.incomplete = revision > 0;
        root_entry.cachable_props = Some(
            svn_props::CACHABLE
                .iter()
                .map(|p| p.to_string())
                .collect(),
        );
        area.entries()?.insert(root_entry);
        area.save_entries()?;
        fsutil::delete_if_exists(&area.admin_file(LOCK_FILE))?;
        debug!(dir = %dir.display(), url, revision, "created versioned directory");
        Ok(area)
    }

    fn write_format_file(&self) -> Result<()> {
        let target = self.admin_file(FORMAT_FILE);
        fsutil::write_via_tmp(
            &self.admin_file("tmp/format"),
            &target,
            format!("{}\n", self.format).as_bytes(),
        )?;
        fsutil::set_readonly(&target, true)?;
        Ok(())
    }

    /// Finish a format upgrade: only the current format may be written.
    pub fn post_upgrade_format(&mut self, format: u32) -> Result<()> {
        if format != WC_FORMAT {
            return Err(WcError::UnsupportedFormat(format!(
                "cannot write unrecognized working copy format {format} in '{}'",
                self.root.display()
            )));
        }
        self.format = format;
        self.write_format_file()
    }

    pub(crate) fn prime_entries(&mut self, table: EntryTable) {
        self.entries = Some(table);
    }

    pub(crate) fn prime_properties(&mut self, name: &str, map: PropertyMap) {
        let mut props = VersionedProperties::new(map);
        props.set_modified(true);
        self.props.insert(name.to_string(), props);
    }

    pub(crate) fn prime_base_properties(&mut self, name: &str, map: PropertyMap) {
        let mut props = VersionedProperties::new(map);
        props.set_modified(true);
        self.base_props.insert(name.to_string(), props);
    }
}

fn fill_from_root(entry: &mut Entry, root: &Entry) {
    if !entry.has_valid_revision()
        && !entry.is_scheduled_for_addition()
        && !entry.is_scheduled_for_replacement()
    {
        entry.revision = root.revision;
    }
    if entry.url.is_none() {
        if let Some(root_url) = &root.url {
            entry.url = Some(entries::url_join(root_url, &entries::uri_encode(&entry.name)));
        }
    }
    if entry.repos_root.is_none() {
        entry.repos_root = root.repos_root.clone();
    }
    if entry.uuid.is_none()
        && !entry.is_scheduled_for_addition()
        && !entry.is_scheduled_for_replacement()
    {
        entry.uuid = root.uuid.clone();
    }
    if entry.cachable_props.is_none() {
        entry.cachable_props = root.cachable_props.clone();
    }
}

fn push_prop_flags(log: &mut Log, name: &str, working: &VersionedProperties, diff: &PropertyDiff) {
    let present: Vec<&str> = svn_props::CACHABLE
        .iter()
        .copied()
        .filter(|p| working.contains(p))
        .collect();
    let fields: EntryPatch = vec![
        (EntryField::CachableProps, Some(svn_props::CACHABLE.join(" "))),
        (
            EntryField::PresentProps,
            (!present.is_empty()).then(|| present.join(" ")),
        ),
        (
            EntryField::HasProps,
            (!working.is_empty()).then(|| "true".to_string()),
        ),
        (
            EntryField::HasPropMods,
            (!diff.is_empty()).then(|| "true".to_string()),
        ),
    ];
    log.add(LogCommand::ModifyEntry {
        name: name.to_string(),
        fields,
    });
}

fn sweep_dir(dir: &Path) -> Result<()> {
    for child in fs::read_dir(dir)? {
        let path = child?.path();
        if path.is_dir() {
            sweep_dir(&path)?;
        } else {
            fsutil::delete_if_exists(&path)?;
        }
    }
    Ok(())
}
