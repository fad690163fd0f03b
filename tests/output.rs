use std::fs;

use fastq_dl::domain::{FetchResult, RunRecord};
use fastq_dl::merge::RunGroups;
use fastq_dl::output::{write_run_info, write_run_mergers};

#[test]
fn run_info_adds_error_column_when_needed() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("fastq-run-info.tsv");
    let ok = RunRecord::new([("run_accession", "SRR1"), ("sample_accession", "SAMN1")]);
    let mut failed = RunRecord::new([("run_accession", "SRR2"), ("sample_accession", "SAMN1")]);
    failed.set_error("ENA_NOT_FOUND&SRA_NOT_FOUND");

    write_run_info(&[ok, failed], &path).unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "run_accession\tsample_accession\terror\n\
         SRR1\tSAMN1\t\n\
         SRR2\tSAMN1\tENA_NOT_FOUND&SRA_NOT_FOUND\n"
    );
}

#[test]
fn run_info_without_errors_has_no_error_column() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("fastq-run-info.tsv");

    write_run_info(&[RunRecord::new([("run_accession", "SRR1")])], &path).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "run_accession\nSRR1\n");
}

#[test]
fn empty_run_info_is_an_empty_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("fastq-run-info.tsv");

    write_run_info(&[], &path).unwrap();

    assert!(path.exists());
    assert_eq!(fs::read_to_string(&path).unwrap(), "");
}

#[test]
fn run_mergers_joins_members_with_semicolons() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("fastq-run-mergers.tsv");
    let mut groups = RunGroups::default();
    groups.add("SRX1", &FetchResult::paired("/o/SRR1_1.fastq.gz", "/o/SRR1_2.fastq.gz"));
    groups.add("SRX1", &FetchResult::paired("/o/SRR2_1.fastq.gz", "/o/SRR2_2.fastq.gz"));
    groups.add("SRX2", &FetchResult::single("/o/SRR3.fastq.gz"));

    write_run_mergers(groups.iter(), &path).unwrap();

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "accession\tr1\tr2\n\
         SRX1\t/o/SRR1_1.fastq.gz;/o/SRR2_1.fastq.gz\t/o/SRR1_2.fastq.gz;/o/SRR2_2.fastq.gz\n\
         SRX2\t/o/SRR3.fastq.gz\t\n"
    );
}
