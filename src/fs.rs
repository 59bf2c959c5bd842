//! Read-only file access through capability handles.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir, fs_utf8::File};

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &Utf8Path)> {
    if !path.is_absolute() {
        return Ok((Utf8Path::new("."), path));
    }
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no parent directory: {path}"),
        )
    })?;
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    Ok((parent, Utf8Path::new(file_name)))
}

/// Reads the whole file at `path`.
pub(crate) fn read(path: &Utf8Path) -> io::Result<Vec<u8>> {
    let (dir_path, file_path) = split(path)?;
    Dir::open_ambient_dir(dir_path, ambient_authority())?.read(file_path)
}

/// Opens the file at `path` for reading.
pub(crate) fn open(path: &Utf8Path) -> io::Result<File> {
    let (dir_path, file_path) = split(path)?;
    Dir::open_ambient_dir(dir_path, ambient_authority())?.open(file_path)
}
