//! Versioned property storage
//!
//! Properties live in hash files: `K <len>` / name / `V <len>` / value
//! pairs closed by an `END` line. Each node has up to three stores —
//! pristine base properties, working properties, and server-cached
//! properties. The server-cached set for a whole directory is
//! consolidated into one `all-wcprops` file: the directory's own block
//! first, then a name line plus block per entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WcError};

pub type PropertyMap = BTreeMap<String, String>;

/// Changes turning one property set into another; `None` deletes.
pub type PropertyDiff = BTreeMap<String, Option<String>>;

// ==================== Property sets ====================

/// One node's property set plus a dirty flag for deferred saving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionedProperties {
    map: PropertyMap,
    modified: bool,
}

impl VersionedProperties {
    pub fn new(map: PropertyMap) -> VersionedProperties {
        VersionedProperties {
            map,
            modified: false,
        }
    }

    pub fn empty() -> VersionedProperties {
        VersionedProperties::new(PropertyMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.map.insert(name.to_string(), value.to_string());
        self.modified = true;
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let removed = self.map.remove(name);
        if removed.is_some() {
            self.modified = true;
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    pub fn as_map(&self) -> &PropertyMap {
        &self.map
    }

    /// Changes needed to turn this set into `other`.
    pub fn compare_to(&self, other: &VersionedProperties) -> PropertyDiff {
        let mut diff = PropertyDiff::new();
        for (name, value) in &other.map {
            match self.map.get(name) {
                Some(own) if own == value => {}
                _ => {
                    diff.insert(name.clone(), Some(value.clone()));
                }
            }
        }
        for name in self.map.keys() {
            if !other.map.contains_key(name) {
                diff.insert(name.clone(), None);
            }
        }
        diff
    }
}

// ==================== Hash file codec ====================

/// Serialize one property block, `END` terminated.
pub fn write_hash(out: &mut Vec<u8>, map: &PropertyMap) {
    for (name, value) in map {
        out.extend_from_slice(format!("K {}\n", name.len()).as_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(format!("V {}\n", value.len()).as_bytes());
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(b"END\n");
}

/// Incremental reader over concatenated hash blocks.
pub struct HashReader<'a> {
    data: &'a [u8],
    pos: usize,
    path: PathBuf,
}

impl<'a> HashReader<'a> {
    pub fn new(data: &'a [u8], path: &Path) -> HashReader<'a> {
        HashReader {
            data,
            pos: 0,
            path: path.to_path_buf(),
        }
    }

    pub fn at_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn corrupt(&self, details: &str) -> WcError {
        WcError::corrupt(&self.path, details)
    }

    /// Next newline-terminated line, `None` at end of input. A final
    /// unterminated line is corrupt.
    pub fn read_line(&mut self) -> Result<Option<&'a [u8]>> {
        if self.at_eof() {
            return Ok(None);
        }
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(end) => {
                self.pos += end + 1;
                Ok(Some(&rest[..end]))
            }
            None => Err(self.corrupt("missing end of line")),
        }
    }

    fn read_exact(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count + 1 > self.data.len() {
            return Err(self.corrupt("unexpected end of hash file"));
        }
        let bytes = &self.data[self.pos..self.pos + count];
        if self.data[self.pos + count] != b'\n' {
            return Err(self.corrupt("hash value not newline-terminated"));
        }
        self.pos += count + 1;
        Ok(bytes)
    }

    /// One `K`/`V` block up to its `END` line.
    pub fn read_block(&mut self) -> Result<PropertyMap> {
        let mut map = PropertyMap::new();
        loop {
            let line = self
                .read_line()?
                .ok_or_else(|| self.corrupt("missing END in hash file"))?;
            if line == b"END" {
                return Ok(map);
            }
            let name_len = parse_counted_header(line, b'K')
                .ok_or_else(|| self.corrupt("malformed K line in hash file"))?;
            let name = self.read_exact(name_len)?;
            let value_line = self
                .read_line()?
                .ok_or_else(|| self.corrupt("missing V line in hash file"))?;
            let value_len = parse_counted_header(value_line, b'V')
                .ok_or_else(|| self.corrupt("malformed V line in hash file"))?;
            let value = self.read_exact(value_len)?;

            let name = String::from_utf8(name.to_vec())
                .map_err(|_| self.corrupt("property name is not valid UTF-8"))?;
            let value = String::from_utf8(value.to_vec())
                .map_err(|_| self.corrupt("property value is not valid UTF-8"))?;
            map.insert(name, value);
        }
    }
}

fn parse_counted_header(line: &[u8], tag: u8) -> Option<usize> {
    if line.len() < 3 || line[0] != tag || line[1] != b' ' {
        return None;
    }
    std::str::from_utf8(&line[2..]).ok()?.parse().ok()
}

/// Parse a whole-file single block.
pub fn parse_hash(data: &[u8], path: &Path) -> Result<PropertyMap> {
    let mut reader = HashReader::new(data, path);
    reader.read_block()
}

// ==================== Consolidated wcprops ====================

/// Parse the consolidated server-cached property file. The empty name
/// keys the directory's own block.
pub fn parse_all_wcprops(data: &[u8], path: &Path) -> Result<BTreeMap<String, PropertyMap>> {
    let mut reader = HashReader::new(data, path);
    let mut all = BTreeMap::new();
    all.insert(String::new(), reader.read_block()?);
    loop {
        let Some(line) = reader.read_line()? else {
            break;
        };
        let name = String::from_utf8(line.to_vec())
            .map_err(|_| WcError::corrupt(path, "entry name is not valid UTF-8"))?;
        all.insert(name, reader.read_block()?);
    }
    Ok(all)
}

/// Serialize the consolidated file. Returns `None` when every block is
/// empty: the file should be deleted rather than written.
pub fn write_all_wcprops(all: &BTreeMap<String, PropertyMap>) -> Option<Vec<u8>> {
    if all.values().all(|map| map.is_empty()) {
        return None;
    }
    let mut out = Vec::new();
    let empty = PropertyMap::new();
    write_hash(&mut out, all.get("").unwrap_or(&empty));
    for (name, map) in all {
        if name.is_empty() || map.is_empty() {
            continue;
        }
        out.extend_from_slice(name.as_bytes());
        out.push(b'\n');
        write_hash(&mut out, map);
    }
    Some(out)
}

// ==================== Standard properties ====================

/// SVN standard properties
pub mod svn_props {
    /// Executable flag
    pub const EXECUTABLE: &str = "svn:executable";

    /// MIME type
    pub const MIME_TYPE: &str = "svn:mime-type";

    /// Ignore patterns
    pub const IGNORE: &str = "svn:ignore";

    /// End-of-line style
    pub const EOL_STYLE: &str = "svn:eol-style";

    /// Keywords
    pub const KEYWORDS: &str = "svn:keywords";

    /// Needs lock
    pub const NEEDS_LOCK: &str = "svn:needs-lock";

    /// Special node (symlink)
    pub const SPECIAL: &str = "svn:special";

    /// Externals
    pub const EXTERNALS: &str = "svn:externals";

    /// Value for svn:executable
    pub const EXECUTABLE_VALUE: &str = "*";

    /// Properties whose presence is cached on the entry so reads can
    /// skip the property file.
    pub const CACHABLE: &[&str] = &[SPECIAL, EXTERNALS, NEEDS_LOCK];

    /// Check if a property name is an SVN standard property
    pub fn is_svn_property(name: &str) -> bool {
        name.starts_with("svn:")
    }
}
