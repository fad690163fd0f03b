use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::FastqDlError;

const BUFFER_SIZE: usize = 10 * 1_048_576;

/// Hex MD5 digest of the file at `path`, or `None` when it does not exist.
///
/// The file is streamed in fixed-size chunks, so memory use does not depend on
/// its size.
pub fn md5_file(path: &Path) -> Result<Option<String>, FastqDlError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(FastqDlError::Filesystem(format!(
                "open {}: {err}",
                path.display()
            )));
        }
    };
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| FastqDlError::Filesystem(format!("read {}: {err}", path.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// True when the file exists and its digest equals `expected` (case-insensitive).
pub fn matches(path: &Path, expected: &str) -> Result<bool, FastqDlError> {
    Ok(md5_file(path)?
        .map(|digest| digest.eq_ignore_ascii_case(expected.trim()))
        .unwrap_or(false))
}
