use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::FetchResult;
use crate::error::FastqDlError;
use crate::fs_util;
use crate::layout::OutputLayout;

/// Per-run outputs collected under one sample or experiment accession.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunGroup {
    pub name: String,
    pub r1: Vec<PathBuf>,
    pub r2: Vec<PathBuf>,
}

impl RunGroup {
    /// Paired only when both mates are present for every run. Some runs are
    /// labelled paired but only ever had one file, so unequal counts fall
    /// back to a single-end merge of the read 1 files.
    pub fn is_paired(&self) -> bool {
        !self.r1.is_empty() && !self.r2.is_empty() && self.r1.len() == self.r2.len()
    }
}

/// Groups in the order their first member arrived.
#[derive(Debug, Clone, Default)]
pub struct RunGroups {
    groups: Vec<RunGroup>,
}

impl RunGroups {
    pub fn add(&mut self, name: &str, result: &FetchResult) {
        let idx = match self.groups.iter().position(|group| group.name == name) {
            Some(idx) => idx,
            None => {
                self.groups.push(RunGroup {
                    name: name.to_string(),
                    ..RunGroup::default()
                });
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[idx];
        group.r1.push(result.r1.clone());
        if let Some(r2) = result.r2() {
            group.r2.push(r2.to_path_buf());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunGroup> {
        self.groups.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedGroup {
    pub name: String,
    pub r1: PathBuf,
    pub r2: Option<PathBuf>,
    pub single_end: bool,
}

/// Merges `paths`, in order, into `output`.
///
/// Every input must exist. One input is renamed; several are concatenated
/// byte for byte and the inputs removed once the output is in place.
pub fn merge_runs(paths: &[PathBuf], output: &Path) -> Result<(), FastqDlError> {
    ensure_inputs(paths.iter())?;

    match paths {
        [] => Err(FastqDlError::MergeEmpty(output.to_path_buf())),
        [only] => {
            if only != output {
                debug!("Renaming {} to {}", only.display(), output.display());
                fs::rename(only, output).map_err(|err| {
                    FastqDlError::Filesystem(format!(
                        "rename {} to {}: {err}",
                        only.display(),
                        output.display()
                    ))
                })?;
            }
            Ok(())
        }
        many => {
            concatenate(many, output)?;
            for path in many {
                if path != output {
                    fs_util::remove_if_exists(path)?;
                }
            }
            Ok(())
        }
    }
}

fn ensure_inputs<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Result<(), FastqDlError> {
    let missing: Vec<PathBuf> = paths.filter(|p| !p.exists()).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FastqDlError::MergeInputMissing(missing))
    }
}

fn concatenate(paths: &[PathBuf], output: &Path) -> Result<(), FastqDlError> {
    let dir = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staged = tempfile::NamedTempFile::new_in(dir)
        .map_err(|err| FastqDlError::Filesystem(format!("temp file in {}: {err}", dir.display())))?;
    {
        let mut writer = BufWriter::new(staged.as_file());
        for path in paths {
            debug!("Appending {} to {}", path.display(), output.display());
            let mut input = File::open(path).map_err(|err| {
                FastqDlError::Filesystem(format!("open {}: {err}", path.display()))
            })?;
            io::copy(&mut input, &mut writer).map_err(|err| {
                FastqDlError::Filesystem(format!("append {}: {err}", path.display()))
            })?;
        }
        writer
            .flush()
            .map_err(|err| FastqDlError::Filesystem(format!("flush {}: {err}", output.display())))?;
    }
    staged
        .persist(output)
        .map_err(|err| FastqDlError::Filesystem(format!("persist {}: {err}", output.display())))?;
    Ok(())
}

/// Merges one group into `{name}.fastq.gz` or `{name}_R1/_R2.fastq.gz`.
pub fn merge_group(group: &RunGroup, layout: &OutputLayout) -> Result<MergedGroup, FastqDlError> {
    if group.is_paired() {
        let r1 = layout.merged_r1(&group.name).into_std_path_buf();
        let r2 = layout.merged_r2(&group.name).into_std_path_buf();
        info!(
            "Merging {} paired-end runs into {} and {}",
            group.r1.len(),
            r1.display(),
            r2.display()
        );
        // Both mates are checked up front so a missing R2 never leaves R1 merged.
        ensure_inputs(group.r1.iter().chain(group.r2.iter()))?;
        merge_runs(&group.r1, &r1)?;
        merge_runs(&group.r2, &r2)?;
        Ok(MergedGroup {
            name: group.name.clone(),
            r1,
            r2: Some(r2),
            single_end: false,
        })
    } else {
        let r1 = layout.merged_single(&group.name).into_std_path_buf();
        info!(
            "Merging {} single-end runs into {}",
            group.r1.len(),
            r1.display()
        );
        merge_runs(&group.r1, &r1)?;
        Ok(MergedGroup {
            name: group.name.clone(),
            r1,
            r2: None,
            single_end: true,
        })
    }
}
