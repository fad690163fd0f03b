use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::FastqDlError;

pub fn ensure_dir(path: &Path) -> Result<(), FastqDlError> {
    fs::create_dir_all(path)
        .map_err(|err| FastqDlError::Filesystem(format!("create {}: {err}", path.display())))
}

/// Removes `path` if present. Returns whether something was removed.
pub fn remove_if_exists(path: &Path) -> Result<bool, FastqDlError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FastqDlError::Filesystem(format!(
            "remove {}: {err}",
            path.display()
        ))),
    }
}

/// Gzips `path` in place to `path.gz` and removes the original, like `gzip -n`.
pub fn gzip_in_place(path: &Path) -> Result<PathBuf, FastqDlError> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let input = File::open(path)
        .map_err(|err| FastqDlError::Filesystem(format!("open {}: {err}", path.display())))?;
    let output = File::create(&target)
        .map_err(|err| FastqDlError::Filesystem(format!("create {}: {err}", target.display())))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)
        .map_err(|err| FastqDlError::Filesystem(format!("gzip {}: {err}", path.display())))?;
    encoder
        .finish()
        .map_err(|err| FastqDlError::Filesystem(format!("gzip {}: {err}", path.display())))?;
    fs::remove_file(path)
        .map_err(|err| FastqDlError::Filesystem(format!("remove {}: {err}", path.display())))?;
    Ok(target)
}
