//! Filesystem primitives for the administrative area
//!
//! Every durable write in the admin area goes through a tmp file in the
//! same directory tree followed by a rename, so readers never observe a
//! half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use crate::error::Result;

/// What a path resolves to on disk, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    None,
    File,
    Dir,
    Symlink,
}

/// Probe a path's type without following symlinks.
pub fn file_type(path: &Path) -> FileType {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let ft = meta.file_type();
            if ft.is_symlink() {
                FileType::Symlink
            } else if ft.is_dir() {
                FileType::Dir
            } else {
                FileType::File
            }
        }
        Err(_) => FileType::None,
    }
}

/// Write `contents` to `tmp`, then rename it over `target`.
pub fn write_via_tmp(tmp: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = tmp.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    rename(tmp, target)?;
    Ok(())
}

/// Rename, clearing a readonly destination first if one is in the way.
pub fn rename(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        set_readonly(to, false)?;
    }
    fs::rename(from, to)?;
    Ok(())
}

/// Toggle the readonly bit.
pub fn set_readonly(path: &Path, readonly: bool) -> Result<()> {
    let meta = fs::metadata(path)?;
    let mut perms = meta.permissions();
    perms.set_readonly(readonly);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Toggle the executable bits where the platform has them.
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let meta = fs::metadata(path)?;
        let mut perms = meta.permissions();
        let mode = if executable {
            perms.mode() | 0o111
        } else {
            perms.mode() & !0o111
        };
        perms.set_mode(mode);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, executable);
    }
    Ok(())
}

/// Create an empty file, failing if it already exists.
///
/// Returns `false` when the file was already there. This is the atomic
/// primitive behind directory write locks.
pub fn create_exclusive(path: &Path) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Delete a file if present; a missing file is not an error.
pub fn delete_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            // A readonly file blocks deletion on some platforms.
            if set_readonly(path, false).is_ok() && fs::remove_file(path).is_ok() {
                return Ok(());
            }
            Err(e.into())
        }
    }
}

/// Delete a directory tree if present.
pub fn delete_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Byte-wise comparison of two files.
pub fn contents_equal(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = fs::metadata(a)?;
    let meta_b = fs::metadata(b)?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let n = ra.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        rb.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

/// Hex-encoded MD5 digest of a file's contents.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(hex::encode(*ctx.compute()))
}

/// Append one file's bytes onto another.
pub fn append_file(src: &Path, dst: &Path) -> Result<()> {
    let mut input = File::open(src)?;
    let mut output = OpenOptions::new().create(true).append(true).open(dst)?;
    io::copy(&mut input, &mut output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_exclusive_refuses_second() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        assert!(create_exclusive(&path).unwrap());
        assert!(!create_exclusive(&path).unwrap());
    }

    #[test]
    fn test_write_via_tmp_replaces_readonly_target() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("tmp-entries");
        let target = dir.path().join("entries");
        write_via_tmp(&tmp, &target, b"one").unwrap();
        set_readonly(&target, true).unwrap();
        write_via_tmp(&tmp, &target, b"two").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");
    }

    #[test]
    fn test_contents_equal() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        assert!(contents_equal(&a, &b).unwrap());
        fs::write(&b, b"same bytez").unwrap();
        assert!(!contents_equal(&a, &b).unwrap());
    }

    #[test]
    fn test_md5_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(md5_file(&path).unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }
}
