//! Journal replay
//!
//! `LogRunner` executes journal commands against an admin area. Entry
//! and wcprop changes accumulate in the area's caches behind dirty
//! flags and flush once per batch, after the last journal finishes or
//! as part of the failure path.

use std::fs;
use std::time::SystemTime;

use tracing::debug;

use crate::area::AdminArea;
use crate::entries::EntryField;
use crate::error::{Result, WcError};
use crate::fsutil::{self, FileType};
use crate::log::{LogCommand, WORKING_TIMESTAMP};
use crate::props::svn_props;
use crate::timeutil;
use crate::translate;

#[derive(Default)]
pub struct LogRunner {
    entries_changed: bool,
    wc_props_changed: bool,
}

impl LogRunner {
    pub fn new() -> LogRunner {
        LogRunner::default()
    }

    pub fn run_command(&mut self, area: &mut AdminArea, command: &LogCommand) -> Result<()> {
        match command {
            LogCommand::ModifyEntry { name, fields } => self.modify_entry(area, name, fields),
            LogCommand::DeleteEntry { name } => self.delete_entry(area, name),
            LogCommand::ModifyWcProperty {
                name,
                propname,
                propvalue,
            } => self.modify_wc_property(area, name, propname, propvalue.as_deref()),
            LogCommand::DeleteLock { name } => self.delete_lock(area, name),
            LogCommand::Move { name, dest } => {
                let to = area.file(dest);
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)?;
                }
                fsutil::rename(&area.file(name), &to)
            }
            LogCommand::Copy { name, dest } => {
                let to = area.file(dest);
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)?;
                }
                fsutil::delete_if_exists(&to)?;
                fs::copy(area.file(name), &to)?;
                Ok(())
            }
            LogCommand::Append { name, dest } => {
                let from = area.file(name);
                // A missing source is tolerated; the producing step may
                // have had nothing to say.
                if fsutil::file_type(&from) == FileType::File {
                    fsutil::append_file(&from, &area.file(dest))?;
                }
                Ok(())
            }
            LogCommand::Delete { name } => fsutil::delete_if_exists(&area.file(name)),
            LogCommand::Readonly { name } => fsutil::set_readonly(&area.file(name), true),
            LogCommand::MaybeReadonly { name } => self.maybe_readonly(area, name),
            LogCommand::SetTimestamp { name, timestamp } => {
                set_timestamp(area, name, timestamp)
            }
            LogCommand::CopyAndTranslate { name, dest } => {
                let options = area.translate_options(dest, true)?;
                translate::translate_file(&area.file(name), &area.file(dest), &options)?;
                if area
                    .property_value(dest, svn_props::EXECUTABLE)?
                    .is_some()
                {
                    fsutil::set_executable(&area.file(dest), true)?;
                }
                self.maybe_readonly(area, dest)
            }
            LogCommand::CopyAndDetranslate { name, dest } => {
                let options = area.translate_options(name, false)?;
                translate::translate_file(&area.file(name), &area.file(dest), &options)
            }
            // Structural merges happen before journaling; the journal
            // records them only so old journals still parse.
            LogCommand::Merge { .. } => Ok(()),
            LogCommand::Committed { .. } => Ok(()),
            LogCommand::UpgradeFormat { format } => {
                area.post_upgrade_format(*format)?;
                self.entries_changed = true;
                Ok(())
            }
        }
    }

    /// Flush after a failed batch so whatever did execute is durable.
    pub fn log_failed(&mut self, area: &mut AdminArea) -> Result<()> {
        self.flush(area)
    }

    /// Flush after the last journal of a batch.
    pub fn log_completed(&mut self, area: &mut AdminArea) -> Result<()> {
        self.flush(area)
    }

    fn flush(&mut self, area: &mut AdminArea) -> Result<()> {
        if self.wc_props_changed {
            area.save_wc_properties()?;
            self.wc_props_changed = false;
        }
        if self.entries_changed {
            area.save_entries()?;
            self.entries_changed = false;
        }
        Ok(())
    }

    fn modify_entry(
        &mut self,
        area: &mut AdminArea,
        name: &str,
        fields: &[(EntryField, Option<String>)],
    ) -> Result<()> {
        let mut patch = fields.to_vec();
        for (field, value) in patch.iter_mut() {
            if value.as_deref() != Some(WORKING_TIMESTAMP) {
                continue;
            }
            // The sentinel resolves against the file state at replay
            // time, not at journaling time.
            *value = match field {
                EntryField::TextTime => Some(timeutil::mtime_string(&area.file(name))?),
                EntryField::PropTime => timeutil::mtime_string(&area.props_file(name)).ok(),
                _ => value.take(),
            };
        }
        area.modify_entry(name, &patch, false, false)?;
        self.entries_changed = true;
        Ok(())
    }

    fn delete_entry(&mut self, area: &mut AdminArea, name: &str) -> Result<()> {
        let Some(entry) = area.entry(name, true)? else {
            return Ok(());
        };
        if entry.is_directory() {
            area.delete_entry(name)?;
        } else {
            area.remove_from_revision_control(name, true)?;
            self.wc_props_changed = true;
        }
        self.entries_changed = true;
        Ok(())
    }

    fn modify_wc_property(
        &mut self,
        area: &mut AdminArea,
        name: &str,
        propname: &str,
        propvalue: Option<&str>,
    ) -> Result<()> {
        let Some(props) = area.wc_properties(name)? else {
            debug!(name, propname, "skipping wcprop change for unknown entry");
            return Ok(());
        };
        match propvalue {
            Some(value) => props.set(propname, value),
            None => {
                props.remove(propname);
            }
        }
        self.wc_props_changed = true;
        Ok(())
    }

    fn delete_lock(&mut self, area: &mut AdminArea, name: &str) -> Result<()> {
        if let Some(entry) = area.entries()?.get_mut(name) {
            entry.lock_token = None;
            entry.lock_owner = None;
            entry.lock_comment = None;
            entry.lock_creation_date = None;
            self.entries_changed = true;
        }
        Ok(())
    }

    fn maybe_readonly(&mut self, area: &mut AdminArea, name: &str) -> Result<()> {
        let Some(entry) = area.entry(name, true)? else {
            return Ok(());
        };
        if entry.lock_token.is_none()
            && area.property_value(name, svn_props::NEEDS_LOCK)?.is_some()
        {
            let path = area.file(name);
            if fsutil::file_type(&path) == FileType::File {
                fsutil::set_readonly(&path, true)?;
            }
        }
        Ok(())
    }
}

fn set_timestamp(area: &AdminArea, name: &str, timestamp: &str) -> Result<()> {
    let path = area.file(name);
    let time = timeutil::parse_date(timestamp).ok_or_else(|| {
        WcError::corrupt(&path, format!("bad timestamp '{timestamp}' in journal"))
    })?;
    fsutil::set_readonly(&path, false)?;
    let file = fs::OpenOptions::new().write(true).open(&path)?;
    file.set_modified(SystemTime::from(time))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{EntryPatch, THIS_DIR};
    use crate::log::Log;
    use std::path::Path;
    use tempfile::TempDir;

    fn make_wc(dir: &Path) -> AdminArea {
        let mut area = AdminArea::create_versioned_directory(
            dir,
            "svn://host/repo/trunk",
            Some("svn://host/repo"),
            None,
            0,
        )
        .unwrap();
        assert!(area.lock().unwrap());
        area
    }

    fn add_file_entry(area: &mut AdminArea, name: &str) {
        let patch: EntryPatch = vec![
            (EntryField::Kind, Some("file".to_string())),
            (EntryField::Revision, Some("1".to_string())),
        ];
        area.modify_entry(name, &patch, true, false).unwrap();
    }

    #[test]
    fn test_replay_move_and_modify_entry() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "a.txt");
        std::fs::write(wc.join(".svn/tmp/a.txt.new"), b"payload").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::Move {
            name: ".svn/tmp/a.txt.new".to_string(),
            dest: "a.txt".to_string(),
        });
        log.add(LogCommand::ModifyEntry {
            name: "a.txt".to_string(),
            fields: vec![(
                EntryField::TextTime,
                Some(WORKING_TIMESTAMP.to_string()),
            )],
        });
        log.save().unwrap();

        area.run_logs().unwrap();
        assert_eq!(std::fs::read(wc.join("a.txt")).unwrap(), b"payload");
        assert!(!wc.join(".svn/log").exists());

        let entry = area.entry("a.txt", false).unwrap().unwrap();
        let recorded = timeutil::date_to_seconds(entry.text_time.as_deref().unwrap());
        let actual = timeutil::mtime_seconds(&wc.join("a.txt")).unwrap();
        assert_eq!(recorded, Some(actual));
    }

    #[test]
    fn test_replay_wcprop_change_is_flushed() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);

        let mut log = area.next_log();
        log.add(LogCommand::ModifyWcProperty {
            name: THIS_DIR.to_string(),
            propname: "svn:wc:ra_dav:version-url".to_string(),
            propvalue: Some("/repo/!svn/ver/2/trunk".to_string()),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        let mut reloaded = AdminArea::new(&wc);
        let props = reloaded.wc_properties(THIS_DIR).unwrap().unwrap();
        assert_eq!(
            props.get("svn:wc:ra_dav:version-url"),
            Some("/repo/!svn/ver/2/trunk")
        );
    }

    #[test]
    fn test_replay_delete_entry_removes_admin_files() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "gone.txt");
        std::fs::write(wc.join("gone.txt"), b"same").unwrap();
        std::fs::write(area.text_base_file("gone.txt"), b"same").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::DeleteEntry {
            name: "gone.txt".to_string(),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        assert!(area.entry("gone.txt", true).unwrap().is_none());
        assert!(!area.text_base_file("gone.txt").exists());
        assert!(!wc.join("gone.txt").exists());
    }

    #[test]
    fn test_replay_delete_entry_keeps_modified_working_file() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "edited.txt");
        std::fs::write(wc.join("edited.txt"), b"local changes").unwrap();
        std::fs::write(area.text_base_file("edited.txt"), b"pristine").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::DeleteEntry {
            name: "edited.txt".to_string(),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        assert!(area.entry("edited.txt", true).unwrap().is_none());
        assert!(wc.join("edited.txt").exists());
    }

    #[test]
    fn test_replay_set_timestamp() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        std::fs::write(wc.join("stamped.txt"), b"x").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::SetTimestamp {
            name: "stamped.txt".to_string(),
            timestamp: "2006-06-15T10:00:00.000000Z".to_string(),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        let secs = timeutil::mtime_seconds(&wc.join("stamped.txt")).unwrap();
        assert_eq!(
            Some(secs),
            timeutil::date_to_seconds("2006-06-15T10:00:00.000000Z")
        );
    }

    #[test]
    fn test_prop_time_sentinel_resolves_against_props_file() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "p.txt");
        add_file_entry(&mut area, "q.txt");
        std::fs::write(area.props_file("p.txt"), b"END\n").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::ModifyEntry {
            name: "p.txt".to_string(),
            fields: vec![(EntryField::PropTime, Some(WORKING_TIMESTAMP.to_string()))],
        });
        log.add(LogCommand::ModifyEntry {
            name: "q.txt".to_string(),
            fields: vec![(EntryField::PropTime, Some(WORKING_TIMESTAMP.to_string()))],
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        let expected = timeutil::mtime_string(&area.props_file("p.txt")).unwrap();
        let entry = area.entry("p.txt", false).unwrap().unwrap();
        assert_eq!(entry.prop_time.as_deref(), Some(expected.as_str()));

        // No property store on disk: the sentinel clears the field.
        let entry = area.entry("q.txt", false).unwrap().unwrap();
        assert_eq!(entry.prop_time, None);
    }

    #[test]
    fn test_replay_delete_lock() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "locked.txt");
        {
            let entry = area.entries().unwrap().get_mut("locked.txt").unwrap();
            entry.lock_token = Some("opaquelocktoken:123".to_string());
            entry.lock_owner = Some("alice".to_string());
        }
        area.save_entries().unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::DeleteLock {
            name: "locked.txt".to_string(),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        let entry = area.entry("locked.txt", false).unwrap().unwrap();
        assert!(entry.lock_token.is_none());
        assert!(entry.lock_owner.is_none());
    }

    #[test]
    fn test_failed_log_is_rewritten_and_renumbered() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        std::fs::write(wc.join(".svn/tmp/ok.new"), b"ok").unwrap();

        // First journal succeeds, second fails on a missing source.
        let mut log0 = area.next_log();
        log0.add(LogCommand::Move {
            name: ".svn/tmp/ok.new".to_string(),
            dest: "ok.txt".to_string(),
        });
        log0.save().unwrap();

        let mut log1 = Log::new(&wc.join(".svn"), 1);
        log1.add(LogCommand::Delete {
            name: "harmless".to_string(),
        });
        log1.add(LogCommand::Move {
            name: ".svn/tmp/missing.new".to_string(),
            dest: "missing.txt".to_string(),
        });
        log1.save().unwrap();

        assert!(area.run_logs().is_err());

        // The finished journal is gone, the failed one moved down to
        // slot zero holding only its unexecuted tail.
        assert!(wc.join("ok.txt").exists());
        assert!(!wc.join(".svn/log.1").exists());
        let survivor = Log::new(&wc.join(".svn"), 0);
        assert!(survivor.exists());
        let commands = survivor.read_commands().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], LogCommand::Move { .. }));
    }

    #[test]
    fn test_replay_copy_and_translate_expands() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);
        add_file_entry(&mut area, "kw.txt");
        {
            let patch: EntryPatch = vec![
                (EntryField::CommittedRev, Some("9".to_string())),
                (EntryField::CommittedAuthor, Some("bob".to_string())),
            ];
            area.modify_entry("kw.txt", &patch, true, false).unwrap();
        }
        let props = area.properties("kw.txt").unwrap();
        props.set(svn_props::KEYWORDS, "Revision");
        std::fs::write(area.text_base_file("kw.txt"), b"rev $Revision$\n").unwrap();

        let mut log = area.next_log();
        log.add(LogCommand::CopyAndTranslate {
            name: ".svn/text-base/kw.txt.svn-base".to_string(),
            dest: "kw.txt".to_string(),
        });
        log.save().unwrap();
        area.run_logs().unwrap();

        let body = std::fs::read_to_string(wc.join("kw.txt")).unwrap();
        assert_eq!(body, "rev $Revision: 9 $\n");
    }

    #[test]
    fn test_merge_and_committed_are_noops() {
        let tmp = TempDir::new().unwrap();
        let wc = tmp.path().join("wc");
        let mut area = make_wc(&wc);

        let mut log = area.next_log();
        log.add(LogCommand::Merge {
            name: "x".to_string(),
            args: vec!["a".to_string(), "b".to_string()],
        });
        log.add(LogCommand::Committed {
            name: "x".to_string(),
            revision: 5,
        });
        log.save().unwrap();
        area.run_logs().unwrap();
        assert!(!wc.join(".svn/log").exists());
    }
}
