//! Crash-safe journal files
//!
//! Pending filesystem and entry mutations are recorded as commands in
//! numbered journal files (`log`, `log.1`, ...) inside the admin
//! directory, written atomically via the tmp area. Each command is one
//! pseudo-XML element; the format is line-oriented and parsed by the
//! same relaxed scanner that has always read these files, not by an XML
//! library. Commands exist as a typed enum everywhere except at this
//! serialization boundary.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::entries::{EntryField, EntryPatch};
use crate::error::{Result, WcError};
use crate::fsutil;
use crate::props::PropertyDiff;

/// Timestamp sentinel: resolve to the target file's mtime at replay.
pub const WORKING_TIMESTAMP: &str = "working";

// ==================== Commands ====================

#[derive(Debug, Clone, PartialEq)]
pub enum LogCommand {
    /// Patch fields of one entry (creating it if needed).
    ModifyEntry { name: String, fields: EntryPatch },
    /// Remove one entry record.
    DeleteEntry { name: String },
    /// Set or clear one server-cached property.
    ModifyWcProperty {
        name: String,
        propname: String,
        propvalue: Option<String>,
    },
    /// Clear the repository lock fields of one entry.
    DeleteLock { name: String },
    /// Rename a file inside the working copy.
    Move { name: String, dest: String },
    /// Copy a file verbatim.
    Copy { name: String, dest: String },
    /// Append one file's bytes onto another.
    Append { name: String, dest: String },
    /// Delete a file.
    Delete { name: String },
    /// Mark a file readonly.
    Readonly { name: String },
    /// Mark readonly unless the entry holds a lock token.
    MaybeReadonly { name: String },
    /// Set a file's mtime.
    SetTimestamp { name: String, timestamp: String },
    /// Copy with keyword/EOL expansion applied.
    CopyAndTranslate { name: String, dest: String },
    /// Copy with keyword/EOL expansion undone.
    CopyAndDetranslate { name: String, dest: String },
    /// Accepted for journal compatibility; nothing here emits it.
    Merge { name: String, args: Vec<String> },
    /// Post-commit marker; replays as a no-op.
    Committed { name: String, revision: i64 },
    /// Rewrite the format file, finishing a format upgrade.
    UpgradeFormat { format: u32 },
}

impl LogCommand {
    fn element_name(&self) -> &'static str {
        match self {
            LogCommand::ModifyEntry { .. } => "modify-entry",
            LogCommand::DeleteEntry { .. } => "delete-entry",
            LogCommand::ModifyWcProperty { .. } => "modify-wcprop",
            LogCommand::DeleteLock { .. } => "delete-lock",
            LogCommand::Move { .. } => "mv",
            LogCommand::Copy { .. } => "cp",
            LogCommand::Append { .. } => "append",
            LogCommand::Delete { .. } => "rm",
            LogCommand::Readonly { .. } => "readonly",
            LogCommand::MaybeReadonly { .. } => "maybe-readonly",
            LogCommand::SetTimestamp { .. } => "set-timestamp",
            LogCommand::CopyAndTranslate { .. } => "cp-and-translate",
            LogCommand::CopyAndDetranslate { .. } => "cp-and-detranslate",
            LogCommand::Merge { .. } => "merge",
            LogCommand::Committed { .. } => "committed",
            LogCommand::UpgradeFormat { .. } => "upgrade-format",
        }
    }

    fn attrs(&self) -> Vec<(String, String)> {
        match self {
            LogCommand::ModifyEntry { name, fields } => {
                let mut attrs = vec![("name".to_string(), name.clone())];
                for (field, value) in fields {
                    attrs.push((
                        field.attr_name().to_string(),
                        value.clone().unwrap_or_default(),
                    ));
                }
                attrs
            }
            LogCommand::DeleteEntry { name }
            | LogCommand::DeleteLock { name }
            | LogCommand::Delete { name }
            | LogCommand::Readonly { name }
            | LogCommand::MaybeReadonly { name } => {
                vec![("name".to_string(), name.clone())]
            }
            LogCommand::ModifyWcProperty {
                name,
                propname,
                propvalue,
            } => {
                let mut attrs = vec![
                    ("name".to_string(), name.clone()),
                    ("propname".to_string(), propname.clone()),
                ];
                if let Some(value) = propvalue {
                    attrs.push(("propval".to_string(), value.clone()));
                }
                attrs
            }
            LogCommand::Move { name, dest }
            | LogCommand::Copy { name, dest }
            | LogCommand::Append { name, dest }
            | LogCommand::CopyAndTranslate { name, dest }
            | LogCommand::CopyAndDetranslate { name, dest } => vec![
                ("name".to_string(), name.clone()),
                ("dest".to_string(), dest.clone()),
            ],
            LogCommand::SetTimestamp { name, timestamp } => vec![
                ("name".to_string(), name.clone()),
                ("timestamp".to_string(), timestamp.clone()),
            ],
            LogCommand::Merge { name, args } => {
                let mut attrs = vec![("name".to_string(), name.clone())];
                for (i, arg) in args.iter().enumerate() {
                    attrs.push((format!("arg{}", i + 1), arg.clone()));
                }
                attrs
            }
            LogCommand::Committed { name, revision } => vec![
                ("name".to_string(), name.clone()),
                ("revision".to_string(), revision.to_string()),
            ],
            LogCommand::UpgradeFormat { format } => {
                vec![("format".to_string(), format.to_string())]
            }
        }
    }

    fn from_attrs(
        element: &str,
        attrs: Vec<(String, String)>,
        path: &Path,
    ) -> Result<LogCommand> {
        let get = |key: &str| -> Option<String> {
            attrs
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        };
        let require = |key: &str| -> Result<String> {
            get(key).ok_or_else(|| {
                WcError::corrupt(path, format!("journal command '{element}' missing '{key}'"))
            })
        };

        let command = match element {
            "modify-entry" => {
                let name = require("name")?;
                let mut fields = EntryPatch::new();
                for (attr, value) in &attrs {
                    if attr == "name" {
                        continue;
                    }
                    let field = EntryField::from_attr_name(attr).ok_or_else(|| {
                        WcError::corrupt(
                            path,
                            format!("journal modify-entry has unknown field '{attr}'"),
                        )
                    })?;
                    let value = if value.is_empty() {
                        None
                    } else {
                        Some(value.clone())
                    };
                    fields.push((field, value));
                }
                LogCommand::ModifyEntry { name, fields }
            }
            "delete-entry" => LogCommand::DeleteEntry {
                name: require("name")?,
            },
            "modify-wcprop" => LogCommand::ModifyWcProperty {
                name: require("name")?,
                propname: require("propname")?,
                propvalue: get("propval"),
            },
            "delete-lock" => LogCommand::DeleteLock {
                name: require("name")?,
            },
            "mv" => LogCommand::Move {
                name: require("name")?,
                dest: require("dest")?,
            },
            "cp" => LogCommand::Copy {
                name: require("name")?,
                dest: require("dest")?,
            },
            "append" => LogCommand::Append {
                name: require("name")?,
                dest: require("dest")?,
            },
            "rm" => LogCommand::Delete {
                name: require("name")?,
            },
            "readonly" => LogCommand::Readonly {
                name: require("name")?,
            },
            "maybe-readonly" => LogCommand::MaybeReadonly {
                name: require("name")?,
            },
            "set-timestamp" => LogCommand::SetTimestamp {
                name: require("name")?,
                timestamp: require("timestamp")?,
            },
            "cp-and-translate" => LogCommand::CopyAndTranslate {
                name: require("name")?,
                dest: require("dest")?,
            },
            "cp-and-detranslate" => LogCommand::CopyAndDetranslate {
                name: require("name")?,
                dest: require("dest")?,
            },
            "merge" => {
                let name = require("name")?;
                let mut args = Vec::new();
                for i in 1..=6 {
                    match get(&format!("arg{i}")) {
                        Some(arg) => args.push(arg),
                        None => break,
                    }
                }
                LogCommand::Merge { name, args }
            }
            "committed" => LogCommand::Committed {
                name: require("name")?,
                revision: require("revision")?.parse().map_err(|_| {
                    WcError::corrupt(path, "journal committed command has bad revision")
                })?,
            },
            "upgrade-format" => LogCommand::UpgradeFormat {
                format: require("format")?.parse().map_err(|_| {
                    WcError::corrupt(path, "journal upgrade-format command has bad format")
                })?,
            },
            other => {
                return Err(WcError::corrupt(
                    path,
                    format!("unknown journal command '{other}'"),
                ));
            }
        };
        Ok(command)
    }
}

// ==================== Attribute encoding ====================

fn xml_encode_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn xml_decode_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let Some(end) = rest.find(';') else {
            out.push_str(rest);
            return out;
        };
        let entity = &rest[1..end];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                if let Some(code) = entity.strip_prefix('#').and_then(|n| n.parse::<u32>().ok()) {
                    if let Some(ch) = char::from_u32(code) {
                        out.push(ch);
                    }
                } else {
                    // Unknown entity: keep it verbatim.
                    out.push_str(&rest[..=end]);
                }
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

// ==================== Journal files ====================

/// Name of the `id`-th journal file.
pub fn log_name(id: u32) -> String {
    if id == 0 {
        "log".to_string()
    } else {
        format!("log.{id}")
    }
}

/// Handle on one numbered journal file plus its in-memory command cache.
pub struct Log {
    path: PathBuf,
    tmp_path: PathBuf,
    cache: Vec<LogCommand>,
}

impl Log {
    pub fn new(admin_dir: &Path, id: u32) -> Log {
        let name = log_name(id);
        Log {
            path: admin_dir.join(&name),
            tmp_path: admin_dir.join("tmp").join(&name),
            cache: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, command: LogCommand) {
        self.cache.push(command);
    }

    /// Queue one modify-wcprop command per changed property.
    pub fn add_changed_wc_properties(&mut self, name: &str, diff: &PropertyDiff) {
        for (propname, propvalue) in diff {
            self.add(LogCommand::ModifyWcProperty {
                name: name.to_string(),
                propname: propname.clone(),
                propvalue: propvalue.clone(),
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write queued commands to disk atomically and clear the cache.
    pub fn save(&mut self) -> Result<()> {
        let commands = std::mem::take(&mut self.cache);
        save_commands(&self.path, &self.tmp_path, &commands)
    }

    /// Rewrite the journal with the given commands, bypassing the cache.
    /// Used to persist a failed command and its unexecuted successors.
    pub fn save_commands(&self, commands: &[LogCommand]) -> Result<()> {
        save_commands(&self.path, &self.tmp_path, commands)
    }

    pub fn delete(&self) -> Result<()> {
        fsutil::delete_if_exists(&self.path)?;
        fsutil::delete_if_exists(&self.tmp_path)
    }

    /// Parse the journal file into typed commands.
    pub fn read_commands(&self) -> Result<Vec<LogCommand>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        parse_commands(&content, &self.path)
    }
}

fn save_commands(path: &Path, tmp_path: &Path, commands: &[LogCommand]) -> Result<()> {
    let mut out = String::new();
    for command in commands {
        out.push('<');
        out.push_str(command.element_name());
        for (attr, value) in command.attrs() {
            out.push_str("\n   ");
            out.push_str(&attr);
            out.push_str("=\"");
            out.push_str(&xml_encode_attr(&value));
            out.push('"');
        }
        out.push_str("/>\n");
    }
    debug!(path = %path.display(), commands = commands.len(), "saving journal");
    fsutil::write_via_tmp(tmp_path, path, out.as_bytes())?;
    fsutil::set_readonly(path, true)?;
    Ok(())
}

fn parse_commands(content: &str, path: &Path) -> Result<Vec<LogCommand>> {
    let mut commands = Vec::new();
    let mut element: Option<String> = None;
    let mut attrs: Vec<(String, String)> = Vec::new();
    for raw_line in content.lines() {
        let line = raw_line.trim();
        if let Some(name) = line.strip_prefix('<') {
            element = Some(name.trim_end_matches("/>").trim().to_string());
            if !line.ends_with("/>") {
                continue;
            }
        } else if let Some(eq) = line.find('=') {
            let attr_name = line[..eq].trim().to_string();
            let mut value = line[eq + 1..].trim();
            value = value.strip_suffix("/>").unwrap_or(value).trim_end();
            value = value.strip_prefix('"').unwrap_or(value);
            value = value.strip_suffix('"').unwrap_or(value);
            attrs.push((attr_name, xml_decode_attr(value)));
        }
        if line.ends_with("/>") {
            let Some(name) = element.take() else {
                return Err(WcError::corrupt(path, "journal command without a name"));
            };
            commands.push(LogCommand::from_attrs(
                &name,
                std::mem::take(&mut attrs),
                path,
            )?);
        }
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn admin_dir() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let admin = dir.path().join(".svn");
        std::fs::create_dir_all(admin.join("tmp")).unwrap();
        (dir, admin)
    }

    #[test]
    fn test_save_and_read_round_trip() {
        let (_dir, admin) = admin_dir();
        let mut log = Log::new(&admin, 0);
        log.add(LogCommand::Move {
            name: ".svn/tmp/text-base/foo.svn-base".to_string(),
            dest: ".svn/text-base/foo.svn-base".to_string(),
        });
        log.add(LogCommand::Readonly {
            name: ".svn/text-base/foo.svn-base".to_string(),
        });
        log.add(LogCommand::ModifyEntry {
            name: "foo".to_string(),
            fields: vec![
                (EntryField::Checksum, Some("abc123".to_string())),
                (EntryField::Kind, Some("file".to_string())),
            ],
        });
        log.save().unwrap();
        assert!(log.exists());

        let commands = log.read_commands().unwrap();
        assert_eq!(commands.len(), 3);
        match &commands[2] {
            LogCommand::ModifyEntry { name, fields } => {
                assert_eq!(name, "foo");
                assert_eq!(fields[0], (EntryField::Checksum, Some("abc123".to_string())));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_attr_values_are_encoded() {
        let (_dir, admin) = admin_dir();
        let mut log = Log::new(&admin, 0);
        log.add(LogCommand::ModifyWcProperty {
            name: "f".to_string(),
            propname: "svn:wc:x".to_string(),
            propvalue: Some("a \"quoted\" <value>\nwith newline & tab\t!".to_string()),
        });
        log.save().unwrap();
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("&quot;"));
        assert!(text.contains("&#10;"));
        assert!(text.contains("&amp;"));

        let commands = log.read_commands().unwrap();
        match &commands[0] {
            LogCommand::ModifyWcProperty { propvalue, .. } => {
                assert_eq!(
                    propvalue.as_deref(),
                    Some("a \"quoted\" <value>\nwith newline & tab\t!")
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_wcprop_deletion_omits_value() {
        let (_dir, admin) = admin_dir();
        let mut log = Log::new(&admin, 0);
        let mut diff = PropertyDiff::new();
        diff.insert("svn:wc:gone".to_string(), None);
        diff.insert("svn:wc:set".to_string(), Some("v".to_string()));
        log.add_changed_wc_properties("f", &diff);
        log.save().unwrap();

        let commands = log.read_commands().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[0],
            LogCommand::ModifyWcProperty { propvalue: None, .. }
        ));
        assert!(matches!(
            &commands[1],
            LogCommand::ModifyWcProperty { propvalue: Some(_), .. }
        ));
    }

    #[test]
    fn test_numbered_log_names() {
        assert_eq!(log_name(0), "log");
        assert_eq!(log_name(1), "log.1");
        assert_eq!(log_name(12), "log.12");
    }

    #[test]
    fn test_unknown_command_is_corrupt() {
        let err = parse_commands("<explode\n   name=\"x\"/>\n", Path::new("/wc/.svn/log"))
            .unwrap_err();
        assert!(matches!(err, WcError::Corrupt { .. }));
    }

    #[test]
    fn test_upgrade_format_round_trip() {
        let (_dir, admin) = admin_dir();
        let mut log = Log::new(&admin, 1);
        log.add(LogCommand::UpgradeFormat { format: 8 });
        log.save().unwrap();
        assert_eq!(
            log.read_commands().unwrap(),
            vec![LogCommand::UpgradeFormat { format: 8 }]
        );
    }
}
