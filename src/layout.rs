use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{MERGED_R1_SUFFIX, MERGED_R2_SUFFIX, PE_R1_SUFFIX, PE_R2_SUFFIX, SE_SUFFIX};
use crate::error::FastqDlError;
use crate::fs_util;

pub const RUN_INFO_SUFFIX: &str = "-run-info.tsv";
pub const RUN_MERGERS_SUFFIX: &str = "-run-mergers.tsv";

/// Names of everything written into one output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: Utf8PathBuf,
    prefix: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<Utf8PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// Resolves `path` against the current directory.
    pub fn from_path(path: &Path, prefix: impl Into<String>) -> Result<Self, FastqDlError> {
        let absolute = std::path::absolute(path)
            .map_err(|err| FastqDlError::Filesystem(format!("{}: {err}", path.display())))?;
        let root = Utf8PathBuf::from_path_buf(absolute)
            .map_err(|_| FastqDlError::Filesystem("non-utf8 output directory".to_string()))?;
        Ok(Self::new(root, prefix))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), FastqDlError> {
        fs_util::ensure_dir(self.root.as_std_path())
    }

    pub fn single_end(&self, accession: &str) -> Utf8PathBuf {
        self.root.join(format!("{accession}{SE_SUFFIX}"))
    }

    pub fn paired_r1(&self, accession: &str) -> Utf8PathBuf {
        self.root.join(format!("{accession}{PE_R1_SUFFIX}"))
    }

    pub fn paired_r2(&self, accession: &str) -> Utf8PathBuf {
        self.root.join(format!("{accession}{PE_R2_SUFFIX}"))
    }

    pub fn staged_archive(&self, accession: &str) -> Utf8PathBuf {
        self.root.join(format!("{accession}.sra"))
    }

    /// Local destination for a remote file: its basename inside the root.
    pub fn for_url(&self, url: &str) -> Utf8PathBuf {
        let name = url.rsplit('/').next().unwrap_or(url);
        self.root.join(name)
    }

    pub fn merged_single(&self, group: &str) -> Utf8PathBuf {
        self.root.join(format!("{group}{SE_SUFFIX}"))
    }

    pub fn merged_r1(&self, group: &str) -> Utf8PathBuf {
        self.root.join(format!("{group}{MERGED_R1_SUFFIX}"))
    }

    pub fn merged_r2(&self, group: &str) -> Utf8PathBuf {
        self.root.join(format!("{group}{MERGED_R2_SUFFIX}"))
    }

    pub fn run_info(&self) -> Utf8PathBuf {
        self.root.join(format!("{}{RUN_INFO_SUFFIX}", self.prefix))
    }

    pub fn run_mergers(&self) -> Utf8PathBuf {
        self.root.join(format!("{}{RUN_MERGERS_SUFFIX}", self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = OutputLayout::new("/data/out", "fastq");
        assert!(layout.single_end("SRR1").ends_with("SRR1.fastq.gz"));
        assert!(layout.paired_r2("SRR1").ends_with("SRR1_2.fastq.gz"));
        assert!(layout.merged_r1("SAMN1").ends_with("SAMN1_R1.fastq.gz"));
        assert_eq!(layout.run_info(), Utf8PathBuf::from("/data/out/fastq-run-info.tsv"));
        assert_eq!(
            layout.for_url(
                "ftp.sra.ebi.ac.uk/vol1/fastq/ERR114/007/ERR1143237/ERR1143237_1.fastq.gz"
            ),
            Utf8PathBuf::from("/data/out/ERR1143237_1.fastq.gz")
        );
    }
}
