//! Legacy XML administrative areas (format 4)
//!
//! Old working copies keep their entries file as an XML document and
//! store server-cached properties in per-file `wcprops/` files rather
//! than one combined store. This module is a read-only view of that
//! layout; writes always go through an upgrade to the current format.

use std::fs;
use std::path::{Path, PathBuf};

use crate::area::ADMIN_DIR_NAME;
use crate::entries::{self, Entry, EntryField, EntryTable};
use crate::error::{Result, WcError};
use crate::fsutil::{self, FileType};
use crate::log::xml_decode_attr;
use crate::props::{self, PropertyMap};

/// Format number of the newest XML layout.
pub const XML_FORMAT: u32 = 4;

pub struct XmlArea {
    root: PathBuf,
    admin_dir: PathBuf,
}

impl XmlArea {
    pub fn new(root: &Path) -> XmlArea {
        XmlArea {
            root: root.to_path_buf(),
            admin_dir: root.join(ADMIN_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    pub fn admin_file(&self, rel: &str) -> PathBuf {
        self.admin_dir.join(rel)
    }

    /// An unfinished journal from an old client blocks upgrading.
    pub fn has_pending_log(&self) -> bool {
        self.admin_file("log").exists()
    }

    pub fn entries(&self) -> Result<EntryTable> {
        let path = self.admin_file("entries");
        let content = fs::read_to_string(&path)?;
        parse_xml_entries(&content, &self.root)
    }

    fn read_prop_file(&self, rel: &str) -> Result<PropertyMap> {
        let path = self.admin_file(rel);
        if fsutil::file_type(&path) != FileType::File {
            return Ok(PropertyMap::new());
        }
        let data = fs::read(&path)?;
        props::parse_hash(&data, &path)
    }

    pub fn base_properties(&self, name: &str) -> Result<PropertyMap> {
        let rel = if name.is_empty() {
            "dir-prop-base".to_string()
        } else {
            format!("prop-base/{name}.svn-base")
        };
        self.read_prop_file(&rel)
    }

    pub fn properties(&self, name: &str) -> Result<PropertyMap> {
        let rel = if name.is_empty() {
            "dir-props".to_string()
        } else {
            format!("props/{name}.svn-work")
        };
        self.read_prop_file(&rel)
    }

    /// Server-cached properties, one file per entry in this layout.
    pub fn wc_properties(&self, name: &str) -> Result<PropertyMap> {
        let rel = if name.is_empty() {
            "dir-wcprops".to_string()
        } else {
            format!("wcprops/{name}.svn-work")
        };
        self.read_prop_file(&rel)
    }

    /// Files and directories the old layout used that the current one
    /// does not. They are swept as the final step of an upgrade.
    pub fn obsolete_paths(&self) -> Vec<PathBuf> {
        vec![
            self.admin_file("README.txt"),
            self.admin_file("empty-file"),
            self.admin_file("dir-wcprops"),
            self.admin_file("wcprops"),
            self.admin_file("tmp/wcprops"),
        ]
    }
}

/// Scan the XML entries document with the same relaxed line-oriented
/// reader the journal uses: an `<entry` line opens a record, `name="v"`
/// lines carry attributes, `/>` closes it.
fn parse_xml_entries(content: &str, dir: &Path) -> Result<EntryTable> {
    let mut table = EntryTable::new();
    let mut current: Option<Vec<(String, String)>> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match &mut current {
            None => {
                if let Some(rest) = line.strip_prefix("<entry") {
                    let mut attrs = Vec::new();
                    if attr_from_line(rest, &mut attrs) {
                        table.insert(entry_from_attrs(attrs, dir)?);
                    } else {
                        current = Some(attrs);
                    }
                }
            }
            Some(attrs) => {
                if attr_from_line(line, attrs) {
                    let attrs = current.take().unwrap_or_default();
                    table.insert(entry_from_attrs(attrs, dir)?);
                }
            }
        }
    }

    table.validate_this_dir(dir)?;
    table.fill_inherited();
    Ok(table)
}

/// Parse one attribute off a line, appending it to `attrs`. Returns
/// true when the line also closes the element.
fn attr_from_line(line: &str, attrs: &mut Vec<(String, String)>) -> bool {
    let mut rest = line.trim();
    let closed = rest.ends_with("/>");
    if closed {
        rest = rest[..rest.len() - 2].trim();
    }
    if let Some((name, value)) = rest.split_once('=') {
        let value = value.trim().trim_matches('"');
        attrs.push((name.trim().to_string(), xml_decode_attr(value)));
    }
    closed
}

fn entry_from_attrs(attrs: Vec<(String, String)>, dir: &Path) -> Result<Entry> {
    let name = attrs
        .iter()
        .find(|(k, _)| k == "name")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();
    let mut entry = Entry::new(&name);
    for (attr, value) in &attrs {
        if attr == "name" {
            continue;
        }
        // Older formats carry attributes this layout no longer tracks.
        let Some(field) = EntryField::from_attr_name(attr) else {
            continue;
        };
        entries::apply_field(&mut entry, field, Some(value.as_str())).map_err(|e| {
            WcError::corrupt(dir, format!("bad XML entry attribute: {e}"))
        })?;
    }
    Ok(entry)
}
