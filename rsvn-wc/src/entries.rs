//! Entry model and administrative file codec
//!
//! The `entries` file is positional: one record per node, one field per
//! line, fields in a fixed order, records terminated by a form-feed line.
//! A record may stop early; absent trailing fields take their defaults.
//! String fields escape backslash and ASCII control bytes as `\xHH`;
//! value fields (kinds, schedules, flags, revisions) are written raw.
//!
//! File entries inherit revision, URL, repository root, UUID and the
//! cachable property list from the directory's own entry; inherited
//! values are omitted on write and restored on read.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, WcError};

/// Name of the directory's own entry.
pub const THIS_DIR: &str = "";

/// Current administrative format number.
pub const WC_FORMAT: u32 = 8;

/// Sentinel for "no revision".
pub const INVALID_REVISION: i64 = -1;

const RECORD_TERMINATOR: char = '\u{0c}';

// ==================== Node kind and schedule ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }

    pub fn parse(text: &str) -> Option<NodeKind> {
        match text {
            "file" => Some(NodeKind::File),
            "dir" => Some(NodeKind::Dir),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Add,
    Delete,
    Replace,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Add => "add",
            Schedule::Delete => "delete",
            Schedule::Replace => "replace",
        }
    }

    pub fn parse(text: &str) -> Option<Schedule> {
        match text {
            "add" => Some(Schedule::Add),
            "delete" => Some(Schedule::Delete),
            "replace" => Some(Schedule::Replace),
            _ => None,
        }
    }
}

// ==================== Entry ====================

/// One versioned node as recorded in the administrative file.
///
/// Field order here matches the on-disk record order. `prop_time` is a
/// legacy field: the old XML format stored it, the positional format
/// does not, so it lives in memory only.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub kind: Option<NodeKind>,
    pub revision: i64,
    pub url: Option<String>,
    pub repos_root: Option<String>,
    pub schedule: Option<Schedule>,
    pub text_time: Option<String>,
    pub checksum: Option<String>,
    pub committed_date: Option<String>,
    pub committed_rev: i64,
    pub committed_author: Option<String>,
    pub has_props: bool,
    pub has_prop_mods: bool,
    pub cachable_props: Option<Vec<String>>,
    pub present_props: Option<Vec<String>>,
    pub prop_reject_file: Option<String>,
    pub conflict_old: Option<String>,
    pub conflict_new: Option<String>,
    pub conflict_wrk: Option<String>,
    pub copied: bool,
    pub copyfrom_url: Option<String>,
    pub copyfrom_rev: i64,
    pub deleted: bool,
    pub absent: bool,
    pub incomplete: bool,
    pub uuid: Option<String>,
    pub lock_token: Option<String>,
    pub lock_owner: Option<String>,
    pub lock_comment: Option<String>,
    pub lock_creation_date: Option<String>,
    pub prop_time: Option<String>,
}

impl Entry {
    pub fn new(name: &str) -> Entry {
        Entry {
            name: name.to_string(),
            kind: None,
            revision: INVALID_REVISION,
            url: None,
            repos_root: None,
            schedule: None,
            text_time: None,
            checksum: None,
            committed_date: None,
            committed_rev: INVALID_REVISION,
            committed_author: None,
            has_props: false,
            has_prop_mods: false,
            cachable_props: None,
            present_props: None,
            prop_reject_file: None,
            conflict_old: None,
            conflict_new: None,
            conflict_wrk: None,
            copied: false,
            copyfrom_url: None,
            copyfrom_rev: INVALID_REVISION,
            deleted: false,
            absent: false,
            incomplete: false,
            uuid: None,
            lock_token: None,
            lock_owner: None,
            lock_comment: None,
            lock_creation_date: None,
            prop_time: None,
        }
    }

    pub fn is_this_dir(&self) -> bool {
        self.name == THIS_DIR
    }

    pub fn is_file(&self) -> bool {
        self.kind == Some(NodeKind::File)
    }

    pub fn is_directory(&self) -> bool {
        self.kind == Some(NodeKind::Dir)
    }

    pub fn is_scheduled_for_addition(&self) -> bool {
        self.schedule == Some(Schedule::Add)
    }

    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.schedule == Some(Schedule::Delete)
    }

    pub fn is_scheduled_for_replacement(&self) -> bool {
        self.schedule == Some(Schedule::Replace)
    }

    /// Deleted or absent nodes are hidden from normal listings unless a
    /// re-addition is pending.
    pub fn is_hidden(&self) -> bool {
        (self.deleted || self.absent)
            && !self.is_scheduled_for_addition()
            && !self.is_scheduled_for_replacement()
    }

    pub fn has_valid_revision(&self) -> bool {
        self.revision >= 0
    }

    /// True when `propname` is in this entry's cachable list.
    pub fn is_cachable_property(&self, propname: &str) -> bool {
        self.cachable_props
            .as_ref()
            .map(|props| props.iter().any(|p| p == propname))
            .unwrap_or(false)
    }

    /// True when `propname` is recorded as present on this entry.
    pub fn is_present_property(&self, propname: &str) -> bool {
        self.present_props
            .as_ref()
            .map(|props| props.iter().any(|p| p == propname))
            .unwrap_or(false)
    }
}

// ==================== Field patches ====================

/// A mutable entry field, named as journal commands name it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Kind,
    Revision,
    Url,
    ReposRoot,
    Schedule,
    TextTime,
    PropTime,
    Checksum,
    CommittedDate,
    CommittedRev,
    CommittedAuthor,
    HasProps,
    HasPropMods,
    CachableProps,
    PresentProps,
    PropRejectFile,
    ConflictOld,
    ConflictNew,
    ConflictWrk,
    Copied,
    CopyfromUrl,
    CopyfromRev,
    Deleted,
    Absent,
    Incomplete,
    Uuid,
    LockToken,
    LockOwner,
    LockComment,
    LockCreationDate,
}

impl EntryField {
    pub fn attr_name(&self) -> &'static str {
        match self {
            EntryField::Kind => "kind",
            EntryField::Revision => "revision",
            EntryField::Url => "url",
            EntryField::ReposRoot => "repos",
            EntryField::Schedule => "schedule",
            EntryField::TextTime => "text-time",
            EntryField::PropTime => "prop-time",
            EntryField::Checksum => "checksum",
            EntryField::CommittedDate => "committed-date",
            EntryField::CommittedRev => "committed-rev",
            EntryField::CommittedAuthor => "last-author",
            EntryField::HasProps => "has-props",
            EntryField::HasPropMods => "has-prop-mods",
            EntryField::CachableProps => "cachable-props",
            EntryField::PresentProps => "present-props",
            EntryField::PropRejectFile => "prop-reject-file",
            EntryField::ConflictOld => "conflict-old",
            EntryField::ConflictNew => "conflict-new",
            EntryField::ConflictWrk => "conflict-wrk",
            EntryField::Copied => "copied",
            EntryField::CopyfromUrl => "copyfrom-url",
            EntryField::CopyfromRev => "copyfrom-rev",
            EntryField::Deleted => "deleted",
            EntryField::Absent => "absent",
            EntryField::Incomplete => "incomplete",
            EntryField::Uuid => "uuid",
            EntryField::LockToken => "lock-token",
            EntryField::LockOwner => "lock-owner",
            EntryField::LockComment => "lock-comment",
            EntryField::LockCreationDate => "lock-creation-date",
        }
    }

    pub fn from_attr_name(name: &str) -> Option<EntryField> {
        let field = match name {
            "kind" => EntryField::Kind,
            "revision" => EntryField::Revision,
            "url" => EntryField::Url,
            "repos" => EntryField::ReposRoot,
            "schedule" => EntryField::Schedule,
            "text-time" => EntryField::TextTime,
            "prop-time" => EntryField::PropTime,
            "checksum" => EntryField::Checksum,
            "committed-date" => EntryField::CommittedDate,
            "committed-rev" => EntryField::CommittedRev,
            "last-author" => EntryField::CommittedAuthor,
            "has-props" => EntryField::HasProps,
            "has-prop-mods" => EntryField::HasPropMods,
            "cachable-props" => EntryField::CachableProps,
            "present-props" => EntryField::PresentProps,
            "prop-reject-file" => EntryField::PropRejectFile,
            "conflict-old" => EntryField::ConflictOld,
            "conflict-new" => EntryField::ConflictNew,
            "conflict-wrk" => EntryField::ConflictWrk,
            "copied" => EntryField::Copied,
            "copyfrom-url" => EntryField::CopyfromUrl,
            "copyfrom-rev" => EntryField::CopyfromRev,
            "deleted" => EntryField::Deleted,
            "absent" => EntryField::Absent,
            "incomplete" => EntryField::Incomplete,
            "uuid" => EntryField::Uuid,
            "lock-token" => EntryField::LockToken,
            "lock-owner" => EntryField::LockOwner,
            "lock-comment" => EntryField::LockComment,
            "lock-creation-date" => EntryField::LockCreationDate,
            _ => return None,
        };
        Some(field)
    }
}

/// Ordered field changes applied to one entry. `None` clears the field.
pub type EntryPatch = Vec<(EntryField, Option<String>)>;

/// Apply one field change to an entry, parsing the textual value.
pub fn apply_field(entry: &mut Entry, field: EntryField, value: Option<&str>) -> Result<()> {
    let invalid = |value: &str| WcError::EntryAttributeInvalid {
        name: entry.name.clone(),
        attribute: field.attr_name().to_string(),
        value: value.to_string(),
    };
    match field {
        EntryField::Kind => {
            entry.kind = match value {
                None | Some("") => None,
                Some(text) => Some(NodeKind::parse(text).ok_or_else(|| {
                    WcError::UnknownNodeKind {
                        name: entry.name.clone(),
                        kind: text.to_string(),
                    }
                })?),
            };
        }
        EntryField::Revision => entry.revision = parse_revision_field(value, &invalid)?,
        EntryField::CommittedRev => entry.committed_rev = parse_revision_field(value, &invalid)?,
        EntryField::CopyfromRev => entry.copyfrom_rev = parse_revision_field(value, &invalid)?,
        EntryField::Schedule => {
            entry.schedule = match value {
                None | Some("") => None,
                Some(text) => Some(Schedule::parse(text).ok_or_else(|| invalid(text))?),
            };
        }
        EntryField::HasProps => entry.has_props = parse_bool_field(value, field),
        EntryField::HasPropMods => entry.has_prop_mods = parse_bool_field(value, field),
        EntryField::Copied => entry.copied = parse_bool_field(value, field),
        EntryField::Deleted => entry.deleted = parse_bool_field(value, field),
        EntryField::Absent => entry.absent = parse_bool_field(value, field),
        EntryField::Incomplete => entry.incomplete = parse_bool_field(value, field),
        EntryField::CachableProps => entry.cachable_props = parse_list_field(value),
        EntryField::PresentProps => entry.present_props = parse_list_field(value),
        EntryField::Url => entry.url = string_field(value),
        EntryField::ReposRoot => entry.repos_root = string_field(value),
        EntryField::TextTime => entry.text_time = string_field(value),
        EntryField::PropTime => entry.prop_time = string_field(value),
        EntryField::Checksum => entry.checksum = string_field(value),
        EntryField::CommittedDate => entry.committed_date = string_field(value),
        EntryField::CommittedAuthor => entry.committed_author = string_field(value),
        EntryField::PropRejectFile => entry.prop_reject_file = string_field(value),
        EntryField::ConflictOld => entry.conflict_old = string_field(value),
        EntryField::ConflictNew => entry.conflict_new = string_field(value),
        EntryField::ConflictWrk => entry.conflict_wrk = string_field(value),
        EntryField::CopyfromUrl => entry.copyfrom_url = string_field(value),
        EntryField::Uuid => entry.uuid = string_field(value),
        EntryField::LockToken => entry.lock_token = string_field(value),
        EntryField::LockOwner => entry.lock_owner = string_field(value),
        EntryField::LockComment => entry.lock_comment = string_field(value),
        EntryField::LockCreationDate => entry.lock_creation_date = string_field(value),
    }
    Ok(())
}

fn string_field(value: Option<&str>) -> Option<String> {
    match value {
        None | Some("") => None,
        Some(text) => Some(text.to_string()),
    }
}

fn parse_revision_field(
    value: Option<&str>,
    invalid: &dyn Fn(&str) -> WcError,
) -> Result<i64> {
    match value {
        None | Some("") => Ok(INVALID_REVISION),
        Some(text) => text.parse::<i64>().map_err(|_| invalid(text)),
    }
}

fn parse_bool_field(value: Option<&str>, field: EntryField) -> bool {
    match value {
        Some("true") => true,
        Some(text) => text == field.attr_name(),
        None => false,
    }
}

fn parse_list_field(value: Option<&str>) -> Option<Vec<String>> {
    match value {
        None | Some("") => None,
        Some(text) => Some(text.split(' ').map(str::to_string).collect()),
    }
}

// ==================== Scheduling fold ====================

/// Outcome of folding a requested schedule change into an entry's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleAction {
    /// Apply this schedule (possibly clearing it).
    Apply(Option<Schedule>),
    /// Drop the schedule change; the entry already has the right state.
    Skip,
    /// The entry was a pending addition; deleting it removes the record.
    RemoveEntry,
}

// ==================== Entry table ====================

/// All entries of one directory, keyed by name. The empty name is the
/// directory's own entry.
#[derive(Debug, Clone, Default)]
pub struct EntryTable {
    entries: BTreeMap<String, Entry>,
}

impl EntryTable {
    pub fn new() -> EntryTable {
        EntryTable {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        self.entries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn this_dir(&self) -> Option<&Entry> {
        self.entries.get(THIS_DIR)
    }

    /// Validate the directory's own entry: it must exist and carry a
    /// revision and URL.
    pub fn validate_this_dir(&self, dir: &Path) -> Result<&Entry> {
        let root = self
            .this_dir()
            .ok_or_else(|| WcError::EntryNotFound(format!("missing default entry in '{}'", dir.display())))?;
        if !root.has_valid_revision() {
            return Err(WcError::EntryMissingRevision(dir.display().to_string()));
        }
        if root.url.is_none() {
            return Err(WcError::EntryMissingUrl(dir.display().to_string()));
        }
        Ok(root)
    }

    /// Fill inherited fields of file entries from the directory's own
    /// entry. Idempotent.
    pub fn fill_inherited(&mut self) {
        let Some(root) = self.this_dir().cloned() else {
            return;
        };
        for entry in self.entries.values_mut() {
            if entry.is_this_dir() || !entry.is_file() {
                continue;
            }
            if !entry.has_valid_revision() {
                entry.revision = root.revision;
            }
            if entry.url.is_none() {
                if let Some(root_url) = root.url.as_deref() {
                    entry.url = Some(url_join(root_url, &uri_encode(&entry.name)));
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
    }

    /// Fold a requested schedule change against current state.
    pub fn fold_scheduling(
        &self,
        name: &str,
        requested: Option<Schedule>,
    ) -> Result<ScheduleAction> {
        let conflict = |details: &str| WcError::ScheduleConflict {
            name: name.to_string(),
            details: details.to_string(),
        };

        let Some(entry) = self.get(name) else {
            if requested == Some(Schedule::Add) {
                return Ok(ScheduleAction::Apply(requested));
            }
            return Err(conflict("not under version control"));
        };

        if name != THIS_DIR {
            if let Some(root) = self.this_dir() {
                if root.is_scheduled_for_deletion() {
                    match requested {
                        Some(Schedule::Add) => {
                            return Err(conflict(
                                "cannot add to a deleted directory; undelete the parent first",
                            ));
                        }
                        Some(Schedule::Replace) => {
                            return Err(conflict(
                                "cannot replace in a deleted directory; undelete the parent first",
                            ));
                        }
                        _ => {}
                    }
                }
            }
        }

        if entry.absent && requested == Some(Schedule::Add) {
            return Err(conflict("marked as absent, cannot schedule for addition"));
        }

        match entry.schedule {
            Some(Schedule::Add) => match requested {
                Some(Schedule::Delete) => {
                    if !entry.deleted {
                        Ok(ScheduleAction::RemoveEntry)
                    } else {
                        Ok(ScheduleAction::Apply(None))
                    }
                }
                _ => Ok(ScheduleAction::Skip),
            },
            Some(Schedule::Delete) => match requested {
                Some(Schedule::Delete) => Ok(ScheduleAction::Skip),
                Some(Schedule::Add) | Some(Schedule::Replace) => {
                    Ok(ScheduleAction::Apply(Some(Schedule::Replace)))
                }
                None => Ok(ScheduleAction::Apply(None)),
            },
            Some(Schedule::Replace) => match requested {
                Some(Schedule::Delete) => Ok(ScheduleAction::Apply(Some(Schedule::Delete))),
                Some(Schedule::Add) | Some(Schedule::Replace) => Ok(ScheduleAction::Skip),
                None => Ok(ScheduleAction::Apply(None)),
            },
            None => match requested {
                Some(Schedule::Add) if !entry.deleted => {
                    Err(conflict("already under version control"))
                }
                None => Ok(ScheduleAction::Skip),
                other => Ok(ScheduleAction::Apply(other)),
            },
        }
    }

    // ==================== Codec ====================

    /// Parse the administrative file. Validates the directory's own
    /// entry and fills inherited fields.
    pub fn parse(content: &str, dir: &Path) -> Result<EntryTable> {
        let mut lines: Vec<&str> = content.split('\n').collect();
        if lines.last() == Some(&"") {
            lines.pop();
        }
        if lines.is_empty() {
            return Err(WcError::corrupt(dir, "empty administrative file"));
        }

        let mut reader = RecordReader {
            lines: &lines,
            pos: 1, // format line already consumed
        };
        let mut table = EntryTable::new();
        let mut ordinal = 1;
        loop {
            match read_record(&mut reader, ordinal) {
                Ok(Some(entry)) => table.insert(entry),
                Ok(None) => break,
                Err(e) => {
                    return Err(WcError::corrupt(
                        dir,
                        format!("error at entry {ordinal}: {e}"),
                    ));
                }
            }
            ordinal += 1;
        }

        table.validate_this_dir(dir)?;
        table.fill_inherited();
        Ok(table)
    }

    /// Serialize the table, omitting fields file entries inherit from
    /// the directory's own entry.
    pub fn serialize(&self, format: u32) -> Result<String> {
        let root = self
            .this_dir()
            .ok_or_else(|| WcError::EntryNotFound("missing default entry".to_string()))?;

        let mut out = String::new();
        out.push_str(&format!("{format}\n"));
        write_record(&mut out, root, None);
        for entry in self.entries.values() {
            if entry.is_this_dir() {
                continue;
            }
            write_record(&mut out, entry, Some(root));
        }
        Ok(out)
    }
}

// ==================== Record reading ====================

struct RecordReader<'a> {
    lines: &'a [&'a str],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    /// Next field line: `None` when the record terminator was reached.
    fn next_field(&mut self) -> Result<Option<&'a str>> {
        let line = self
            .next_line()
            .ok_or_else(|| corrupt_record("unexpected end of entry"))?;
        if line.starts_with(RECORD_TERMINATOR) {
            Ok(None)
        } else {
            Ok(Some(line))
        }
    }
}

fn corrupt_record(details: &str) -> WcError {
    WcError::Corrupt {
        path: Path::new("").to_path_buf(),
        details: details.to_string(),
    }
}

fn read_record(reader: &mut RecordReader<'_>, ordinal: usize) -> Result<Option<Entry>> {
    let Some(first) = reader.next_line() else {
        if ordinal > 1 {
            return Ok(None);
        }
        return Err(corrupt_record("unexpected end of entry"));
    };

    let name = parse_string(first)?.unwrap_or_default();
    let mut entry = Entry::new(&name);

    let kind_line = reader
        .next_line()
        .ok_or_else(|| corrupt_record("unexpected end of entry"))?;
    if let Some(kind) = parse_value(kind_line) {
        entry.kind = Some(NodeKind::parse(kind).ok_or_else(|| WcError::UnknownNodeKind {
            name: name.clone(),
            kind: kind.to_string(),
        })?);
    }

    macro_rules! field {
        () => {
            match reader.next_field()? {
                Some(line) => line,
                None => return Ok(Some(entry)),
            }
        };
    }

    if let Some(rev) = parse_value(field!()) {
        entry.revision = parse_revision(rev, &name, "revision")?;
    }
    if let Some(url) = parse_string(field!())? {
        entry.url = Some(url);
    }
    if let Some(root) = parse_string(field!())? {
        if let Some(url) = entry.url.as_deref() {
            if !is_url_ancestor(&root, url) {
                return Err(corrupt_record(&format!(
                    "entry '{name}' has invalid repository root"
                )));
            }
        }
        entry.repos_root = Some(root);
    }
    if let Some(schedule) = parse_value(field!()) {
        entry.schedule = Some(Schedule::parse(schedule).ok_or_else(|| {
            WcError::EntryAttributeInvalid {
                name: name.clone(),
                attribute: "schedule".to_string(),
                value: schedule.to_string(),
            }
        })?);
    }
    if let Some(text_time) = parse_value(field!()) {
        entry.text_time = Some(text_time.to_string());
    }
    if let Some(checksum) = parse_string(field!())? {
        entry.checksum = Some(checksum);
    }
    if let Some(date) = parse_value(field!()) {
        entry.committed_date = Some(date.to_string());
    }
    if let Some(rev) = parse_value(field!()) {
        entry.committed_rev = parse_revision(rev, &name, "committed-rev")?;
    }
    if let Some(author) = parse_string(field!())? {
        entry.committed_author = Some(author);
    }
    entry.has_props = parse_boolean(field!(), "has-props")?;
    entry.has_prop_mods = parse_boolean(field!(), "has-prop-mods")?;
    if let Some(props) = parse_value(field!()) {
        entry.cachable_props = Some(props.split(' ').map(str::to_string).collect());
    }
    if let Some(props) = parse_value(field!()) {
        entry.present_props = Some(props.split(' ').map(str::to_string).collect());
    }
    if let Some(prej) = parse_string(field!())? {
        entry.prop_reject_file = Some(prej);
    }
    if let Some(old) = parse_string(field!())? {
        entry.conflict_old = Some(old);
    }
    if let Some(new) = parse_string(field!())? {
        entry.conflict_new = Some(new);
    }
    if let Some(wrk) = parse_string(field!())? {
        entry.conflict_wrk = Some(wrk);
    }
    entry.copied = parse_boolean(field!(), "copied")?;
    if let Some(url) = parse_string(field!())? {
        entry.copyfrom_url = Some(url);
    }
    if let Some(rev) = parse_value(field!()) {
        entry.copyfrom_rev = parse_revision(rev, &name, "copyfrom-rev")?;
    }
    entry.deleted = parse_boolean(field!(), "deleted")?;
    entry.absent = parse_boolean(field!(), "absent")?;
    entry.incomplete = parse_boolean(field!(), "incomplete")?;
    if let Some(uuid) = parse_string(field!())? {
        entry.uuid = Some(uuid);
    }
    if let Some(token) = parse_string(field!())? {
        entry.lock_token = Some(token);
    }
    if let Some(owner) = parse_string(field!())? {
        entry.lock_owner = Some(owner);
    }
    if let Some(comment) = parse_string(field!())? {
        entry.lock_comment = Some(comment);
    }
    if let Some(date) = parse_value(field!()) {
        entry.lock_creation_date = Some(date.to_string());
    }

    // Full-length record: the terminator must follow.
    let terminator = reader
        .next_line()
        .ok_or_else(|| corrupt_record("missing entry terminator"))?;
    if terminator.len() != 1 || !terminator.starts_with(RECORD_TERMINATOR) {
        return Err(corrupt_record("invalid entry terminator"));
    }
    Ok(Some(entry))
}

fn parse_value(line: &str) -> Option<&str> {
    if line.is_empty() { None } else { Some(line) }
}

fn parse_string(line: &str) -> Result<Option<String>> {
    if line.is_empty() {
        return Ok(None);
    }
    if !line.contains('\\') {
        return Ok(Some(line.to_string()));
    }
    let bytes = line.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 3 >= bytes.len()
                || bytes[i + 1] != b'x'
                || !bytes[i + 2].is_ascii_hexdigit()
                || !bytes[i + 3].is_ascii_hexdigit()
            {
                return Err(corrupt_record("invalid escape sequence"));
            }
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).unwrap_or("");
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| corrupt_record("invalid escape sequence"))?;
            decoded.push(byte);
            i += 4;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded)
        .map(Some)
        .map_err(|_| corrupt_record("escape sequence decodes to invalid UTF-8"))
}

fn parse_boolean(line: &str, field: &str) -> Result<bool> {
    match parse_value(line) {
        None => Ok(false),
        Some(text) if text == field => Ok(true),
        Some(_) => Err(corrupt_record(&format!("invalid value for field '{field}'"))),
    }
}

fn parse_revision(text: &str, name: &str, attribute: &str) -> Result<i64> {
    text.parse::<i64>()
        .map_err(|_| WcError::EntryAttributeInvalid {
            name: name.to_string(),
            attribute: attribute.to_string(),
            value: text.to_string(),
        })
}

// ==================== Record writing ====================

struct FieldWriter<'a> {
    out: &'a mut String,
    empty: usize,
}

impl<'a> FieldWriter<'a> {
    fn flush_empties(&mut self) {
        for _ in 0..self.empty {
            self.out.push('\n');
        }
        self.empty = 0;
    }

    /// Escaped string field.
    fn string(&mut self, value: Option<&str>) {
        match value {
            Some(text) if !text.is_empty() => {
                self.flush_empties();
                for &byte in text.as_bytes() {
                    if byte.is_ascii_control() || byte == b'\\' {
                        self.out.push_str(&format!("\\x{byte:02x}"));
                    } else {
                        self.out.push(byte as char);
                    }
                }
                self.out.push('\n');
            }
            _ => self.empty += 1,
        }
    }

    /// Raw value field, no escaping.
    fn value(&mut self, value: Option<&str>) {
        match value {
            Some(text) if !text.is_empty() => {
                self.flush_empties();
                self.out.push_str(text);
                self.out.push('\n');
            }
            _ => self.empty += 1,
        }
    }

    fn revision(&mut self, rev: Option<i64>) {
        match rev {
            Some(r) if r >= 0 => self.value(Some(&r.to_string())),
            _ => self.empty += 1,
        }
    }

    fn boolean(&mut self, flag: bool, name: &str) {
        if flag {
            self.value(Some(name));
        } else {
            self.empty += 1;
        }
    }

    fn finish(self) {
        self.out.push(RECORD_TERMINATOR);
        self.out.push('\n');
    }
}

fn write_record(out: &mut String, entry: &Entry, root: Option<&Entry>) {
    let is_this_dir = root.is_none();
    let is_subdir = !is_this_dir && entry.is_directory();
    let mut w = FieldWriter { out, empty: 0 };

    w.string(Some(&entry.name));
    w.value(entry.kind.map(|k| k.as_str()));

    let revision = if is_subdir {
        None
    } else if is_this_dir {
        Some(entry.revision)
    } else {
        let root_rev = root.map(|r| r.revision).unwrap_or(INVALID_REVISION);
        if entry.revision == root_rev {
            None
        } else {
            Some(entry.revision)
        }
    };
    w.revision(revision);

    let url = if is_subdir {
        None
    } else if is_this_dir {
        entry.url.as_deref()
    } else {
        let derived = root
            .and_then(|r| r.url.as_deref())
            .map(|root_url| url_join(root_url, &uri_encode(&entry.name)));
        match (entry.url.as_deref(), derived.as_deref()) {
            (Some(url), Some(derived)) if url == derived => None,
            (url, _) => url,
        }
    };
    w.string(url);

    let repos_root = if is_subdir {
        None
    } else if is_this_dir {
        entry.repos_root.as_deref()
    } else {
        match (entry.repos_root.as_deref(), root.and_then(|r| r.repos_root.as_deref())) {
            (Some(own), Some(inherited)) if own == inherited => None,
            (own, _) => own,
        }
    };
    w.string(repos_root);

    w.value(entry.schedule.map(|s| s.as_str()));
    w.value(entry.text_time.as_deref());
    w.value(entry.checksum.as_deref());
    w.value(entry.committed_date.as_deref());
    w.revision(Some(entry.committed_rev));
    w.string(entry.committed_author.as_deref());
    w.boolean(entry.has_props, "has-props");
    w.boolean(entry.has_prop_mods, "has-prop-mods");

    let cachable = entry.cachable_props.as_ref().map(|p| p.join(" "));
    let cachable = if !is_this_dir {
        let inherited = root
            .and_then(|r| r.cachable_props.as_ref())
            .map(|p| p.join(" "));
        match (cachable, inherited) {
            (Some(own), Some(inherited)) if own == inherited => None,
            (own, _) => own,
        }
    } else {
        cachable
    };
    w.value(cachable.as_deref());

    let present = entry.present_props.as_ref().map(|p| p.join(" "));
    w.value(present.as_deref());

    w.string(entry.prop_reject_file.as_deref());
    w.string(entry.conflict_old.as_deref());
    w.string(entry.conflict_new.as_deref());
    w.string(entry.conflict_wrk.as_deref());
    w.boolean(entry.copied, "copied");
    w.string(entry.copyfrom_url.as_deref());
    w.revision(Some(entry.copyfrom_rev));
    w.boolean(entry.deleted, "deleted");
    w.boolean(entry.absent, "absent");
    w.boolean(entry.incomplete, "incomplete");

    let uuid = if !is_this_dir {
        match (entry.uuid.as_deref(), root.and_then(|r| r.uuid.as_deref())) {
            (Some(own), Some(inherited)) if own == inherited => None,
            (own, _) => own,
        }
    } else {
        entry.uuid.as_deref()
    };
    w.value(uuid);

    w.string(entry.lock_token.as_deref());
    w.string(entry.lock_owner.as_deref());
    w.string(entry.lock_comment.as_deref());
    w.value(entry.lock_creation_date.as_deref());
    w.finish();
}

// ==================== URL helpers ====================

/// Join a URL and a path segment with a single slash.
pub fn url_join(base: &str, segment: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        segment.to_string()
    } else if segment.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{segment}")
    }
}

/// True when `url` is `root` or lives under it.
pub fn is_url_ancestor(root: &str, url: &str) -> bool {
    let root = root.trim_end_matches('/');
    url == root || url.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
}

/// Percent-encode a path segment for embedding in a URL.
pub fn uri_encode(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for &byte in segment.as_bytes() {
        let keep = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~');
        if keep {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EntryTable {
        let mut table = EntryTable::new();
        let mut root = Entry::new(THIS_DIR);
        root.kind = Some(NodeKind::Dir);
        root.revision = 5;
        root.url = Some("svn://example.com/repo/trunk".to_string());
        root.repos_root = Some("svn://example.com/repo".to_string());
        root.uuid = Some("2e1a4c63-1d26-4a39-9a5a-cdd5a32b0d23".to_string());
        root.cachable_props = Some(vec![
            "svn:special".to_string(),
            "svn:externals".to_string(),
            "svn:needs-lock".to_string(),
        ]);
        table.insert(root);
        table
    }

    #[test]
    fn test_round_trip_preserves_entries() {
        let mut table = sample_table();
        let mut file = Entry::new("foo.txt");
        file.kind = Some(NodeKind::File);
        file.checksum = Some("d41d8cd98f00b204e9800998ecf8427e".to_string());
        file.text_time = Some("2006-01-01T12:00:00.000000Z".to_string());
        table.insert(file);
        table.fill_inherited();

        let text = table.serialize(WC_FORMAT).unwrap();
        let reparsed = EntryTable::parse(&text, Path::new("/wc")).unwrap();
        assert_eq!(reparsed.len(), table.len());
        for entry in table.iter() {
            assert_eq!(reparsed.get(&entry.name), Some(entry));
        }
    }

    #[test]
    fn test_file_entry_inherits_from_this_dir() {
        let mut table = sample_table();
        let mut file = Entry::new("foo.txt");
        file.kind = Some(NodeKind::File);
        table.insert(file);

        let text = table.serialize(WC_FORMAT).unwrap();
        let reparsed = EntryTable::parse(&text, Path::new("/wc")).unwrap();
        let foo = reparsed.get("foo.txt").unwrap();
        assert_eq!(foo.revision, 5);
        assert_eq!(foo.url.as_deref(), Some("svn://example.com/repo/trunk/foo.txt"));
        assert_eq!(foo.repos_root.as_deref(), Some("svn://example.com/repo"));
        assert_eq!(foo.uuid, reparsed.this_dir().unwrap().uuid);
    }

    #[test]
    fn test_inherited_fields_omitted_on_write() {
        let mut table = sample_table();
        let mut file = Entry::new("foo.txt");
        file.kind = Some(NodeKind::File);
        table.insert(file);
        table.fill_inherited();

        let text = table.serialize(WC_FORMAT).unwrap();
        // The derived URL must not appear verbatim in the file entry.
        let records: Vec<&str> = text.split('\u{0c}').collect();
        assert!(records[1].contains("foo.txt"));
        assert!(!records[1].contains("svn://example.com/repo/trunk/foo.txt"));
        assert!(!records[1].contains("2e1a4c63"));
    }

    #[test]
    fn test_escape_round_trip() {
        let mut table = sample_table();
        let mut file = Entry::new("foo.txt");
        file.kind = Some(NodeKind::File);
        file.committed_author = Some("back\\slash and \t tab \u{1} ctl".to_string());
        table.insert(file);
        table.fill_inherited();

        let text = table.serialize(WC_FORMAT).unwrap();
        assert!(text.contains("back\\x5cslash and \\x09 tab \\x01 ctl"));
        let reparsed = EntryTable::parse(&text, Path::new("/wc")).unwrap();
        assert_eq!(
            reparsed.get("foo.txt").unwrap().committed_author.as_deref(),
            Some("back\\slash and \t tab \u{1} ctl")
        );
    }

    #[test]
    fn test_invalid_escape_is_corrupt() {
        let text = "8\n\ndir\n5\nsvn://host/r\nsvn://host/r\n\u{0c}\nbad\\zz\nfile\n\u{0c}\n";
        let err = EntryTable::parse(text, Path::new("/wc")).unwrap_err();
        assert!(matches!(err, WcError::Corrupt { .. }));
    }

    #[test]
    fn test_boolean_field_must_match_name() {
        // "has-props" slot holding a stray value is corrupt.
        let text = "8\n\ndir\n5\nsvn://host/r\nsvn://host/r\n\n\n\n\n\n\nbogus\n\u{0c}\n";
        let err = EntryTable::parse(text, Path::new("/wc")).unwrap_err();
        assert!(matches!(err, WcError::Corrupt { .. }));
    }

    #[test]
    fn test_missing_default_entry() {
        let text = "8\nfoo.txt\nfile\n\u{0c}\n";
        let err = EntryTable::parse(text, Path::new("/wc")).unwrap_err();
        assert!(matches!(err, WcError::EntryNotFound(_)));
    }

    #[test]
    fn test_this_dir_requires_revision_and_url() {
        let no_rev = "8\n\ndir\n\nsvn://host/r\n\u{0c}\n";
        assert!(matches!(
            EntryTable::parse(no_rev, Path::new("/wc")).unwrap_err(),
            WcError::EntryMissingRevision(_)
        ));
        let no_url = "8\n\ndir\n5\n\u{0c}\n";
        assert!(matches!(
            EntryTable::parse(no_url, Path::new("/wc")).unwrap_err(),
            WcError::EntryMissingUrl(_)
        ));
    }

    #[test]
    fn test_subdir_entry_writes_no_url() {
        let mut table = sample_table();
        let mut sub = Entry::new("sub");
        sub.kind = Some(NodeKind::Dir);
        sub.revision = 5;
        sub.url = Some("svn://example.com/repo/trunk/sub".to_string());
        table.insert(sub);

        let text = table.serialize(WC_FORMAT).unwrap();
        let reparsed = EntryTable::parse(&text, Path::new("/wc")).unwrap();
        let sub = reparsed.get("sub").unwrap();
        // Directory children re-read these from their own admin area.
        assert_eq!(sub.url, None);
        assert_eq!(sub.revision, INVALID_REVISION);
    }

    #[test]
    fn test_fold_scheduling_add_then_delete_removes_entry() {
        let mut table = sample_table();
        let mut file = Entry::new("new.txt");
        file.kind = Some(NodeKind::File);
        file.schedule = Some(Schedule::Add);
        table.insert(file);
        let action = table
            .fold_scheduling("new.txt", Some(Schedule::Delete))
            .unwrap();
        assert_eq!(action, ScheduleAction::RemoveEntry);
    }

    #[test]
    fn test_fold_scheduling_delete_then_add_is_replace() {
        let mut table = sample_table();
        let mut file = Entry::new("gone.txt");
        file.kind = Some(NodeKind::File);
        file.schedule = Some(Schedule::Delete);
        table.insert(file);
        let action = table.fold_scheduling("gone.txt", Some(Schedule::Add)).unwrap();
        assert_eq!(action, ScheduleAction::Apply(Some(Schedule::Replace)));
    }

    #[test]
    fn test_fold_scheduling_add_versioned_conflicts() {
        let mut table = sample_table();
        let mut file = Entry::new("here.txt");
        file.kind = Some(NodeKind::File);
        table.insert(file);
        let err = table
            .fold_scheduling("here.txt", Some(Schedule::Add))
            .unwrap_err();
        assert!(matches!(err, WcError::ScheduleConflict { .. }));
    }

    #[test]
    fn test_fold_scheduling_unversioned_only_add() {
        let table = sample_table();
        assert!(table.fold_scheduling("nope", Some(Schedule::Delete)).is_err());
        assert_eq!(
            table.fold_scheduling("nope", Some(Schedule::Add)).unwrap(),
            ScheduleAction::Apply(Some(Schedule::Add))
        );
    }

    #[test]
    fn test_hidden_entries() {
        let mut entry = Entry::new("gone");
        entry.deleted = true;
        assert!(entry.is_hidden());
        entry.schedule = Some(Schedule::Add);
        assert!(!entry.is_hidden());
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("plain-name_1.txt"), "plain-name_1.txt");
        assert_eq!(uri_encode("with space"), "with%20space");
        assert_eq!(uri_encode("a#b"), "a%23b");
    }

    #[test]
    fn test_truncated_record_defaults_tail() {
        // Record stops right after the revision field.
        let text = "8\n\ndir\n7\nsvn://host/r\n\u{0c}\n";
        let table = EntryTable::parse(text, Path::new("/wc")).unwrap();
        let root = table.this_dir().unwrap();
        assert_eq!(root.revision, 7);
        assert!(!root.has_props);
        assert_eq!(root.checksum, None);
    }
}
