mod common;

use std::{
    collections::HashMap,
    fs,
    path::Path,
    time::{Duration, Instant},
};

use common::{
    data_lines, is_empty_dir, line, random_lines, score, vcf, write, Passthrough, PED,
};
use genmod::{
    annotate::ModelAnnotator,
    config::{AnnotateConfig, IndexSource, SortSettings},
    error::{InputError, WorkerFailure},
    pipeline,
    read::InputSource,
    write::OutputTarget,
    Error,
};

struct Fixture {
    dir: tempfile::TempDir,
    scratch_parent: tempfile::TempDir,
}
impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            scratch_parent: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self, vcf_text: &str, out: &str) -> AnnotateConfig {
        let ped = write(self.dir.path(), "family.ped", PED);
        let input = write(self.dir.path(), "input.vcf", vcf_text);
        AnnotateConfig::new(&ped, InputSource::Path(input))
            .output(OutputTarget::Path(self.dir.path().join(out)))
            .tmp_dir(Some(self.scratch_parent.path().to_path_buf()))
            .batch_size(7)
            .queue_capacity(4)
    }

    fn read(&self, out: &str) -> String {
        fs::read_to_string(self.dir.path().join(out)).unwrap()
    }

    fn no_scratch_left(&self) -> bool {
        is_empty_dir(self.scratch_parent.path())
    }
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

// ==================== Property Tests ====================

#[test]
fn test_multiset_preserved_for_any_worker_count() {
    let input = random_lines(500, 7);
    let mut outputs = Vec::new();
    for workers in [1, 2, 8] {
        let fx = Fixture::new();
        let config = fx.config(&vcf(&input), "out.vcf").workers(workers);
        let summary = pipeline::annotate(&config, Passthrough).unwrap();
        assert_eq!(summary.records, 500);
        assert_eq!(summary.written, 500);
        assert_eq!(summary.workers, workers);

        let out = data_lines(&fx.read("out.vcf"));
        assert_eq!(sorted(out.clone()), sorted(input.clone()));
        assert!(fx.no_scratch_left());
        outputs.push(out);
    }
    // the ordinal tie-break makes the output independent of scheduling
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
}

#[test]
fn test_chromosomes_in_first_seen_order_and_monotonic() {
    let input = random_lines(300, 11);
    let fx = Fixture::new();
    let config = fx.config(&vcf(&input), "out.vcf").workers(4);
    let summary = pipeline::annotate(&config, Passthrough).unwrap();

    let mut first_seen: Vec<&str> = Vec::new();
    for l in &input {
        let chrom = l.split('\t').next().unwrap();
        if !first_seen.contains(&chrom) {
            first_seen.push(chrom);
        }
    }
    assert_eq!(summary.chromosomes, first_seen);

    let out = data_lines(&fx.read("out.vcf"));
    let mut blocks: Vec<String> = Vec::new();
    let mut last: HashMap<String, i64> = HashMap::new();
    for l in &out {
        let chrom = l.split('\t').next().unwrap().to_string();
        if blocks.last() != Some(&chrom) {
            assert!(!blocks.contains(&chrom), "chromosome {chrom} split in output");
            blocks.push(chrom.clone());
        }
        let s = score(l);
        if let Some(prev) = last.insert(chrom, s) {
            assert!(prev >= s);
        }
    }
    assert_eq!(blocks, first_seen);
}

#[test]
fn test_spilled_sort_matches_in_memory() {
    let input = random_lines(400, 3);
    let fx = Fixture::new();
    let in_memory = fx.config(&vcf(&input), "mem.vcf").workers(2);
    pipeline::annotate(&in_memory, Passthrough).unwrap();

    let spilled = fx
        .config(&vcf(&input), "spill.vcf")
        .workers(2)
        .sort(SortSettings {
            max_records: Some(10),
            max_fan_in: 3,
            ..SortSettings::default()
        });
    let summary = pipeline::annotate(&spilled, Passthrough).unwrap();
    assert!(summary.sort.chunks_written > 3);
    assert_eq!(fx.read("mem.vcf"), fx.read("spill.vcf"));
    assert!(fx.no_scratch_left());
}

// ==================== Scenario Tests ====================

#[test]
fn test_two_chromosome_scenario() {
    let input = vec![line("chr1", 10, 5), line("chr1", 20, 1), line("chr2", 5, 9)];
    let fx = Fixture::new();
    let config = fx.config(&vcf(&input), "out.vcf").workers(2);
    pipeline::annotate(&config, Passthrough).unwrap();

    let out = fx.read("out.vcf");
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "##fileformat=VCFv4.1");
    assert!(lines[lines.len() - 4].starts_with("#CHROM"));
    let injected: Vec<&str> = lines
        .iter()
        .filter(|l| l.starts_with("##INFO=<ID="))
        .copied()
        .collect();
    for id in ["ANN", "Comp", "GM", "MS", "RankScore"] {
        assert!(
            injected.iter().any(|l| l.starts_with(&format!("##INFO=<ID={id},"))),
            "missing {id}"
        );
    }
    assert!(!injected.iter().any(|l| l.starts_with("##INFO=<ID=CADD,")));
    assert_eq!(data_lines(&out), input);
}

#[test]
fn test_inheritance_models_end_to_end() {
    let ped = "1\tfather\t0\t0\t1\t1\n1\tmother\t0\t0\t2\t1\n1\tchild\tfather\tmother\t1\t2\n";
    let text = "##fileformat=VCFv4.1\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tfather\tmother\tchild\n\
        1\t100\t.\tA\tG\t50\tPASS\t.\tGT:GQ\t0/1:40\t0/0:50\t0/0:30\n\
        1\t200\t.\tA\tG\t50\tPASS\t.\tGT:GQ\t0/1:40\t0/1:50\t1/1:30\n\
        1\t300\t.\tA\tG\t50\tPASS\t.\tGT:GQ\t0/0:40\t0/0:50\t0/1:30\n\
        1\t400\t.\tA\tG\t50\tPASS\t.\tGT:GQ\t0/0:40\t0/0:50\t0/x:30\n";
    let fx = Fixture::new();
    let ped = write(fx.dir.path(), "trio.ped", ped);
    let input = write(fx.dir.path(), "trio.vcf", text);
    let config = AnnotateConfig::new(&ped, InputSource::Path(input))
        .output(OutputTarget::Path(fx.dir.path().join("out.vcf")))
        .tmp_dir(Some(fx.scratch_parent.path().to_path_buf()))
        .workers(2);
    let summary = pipeline::annotate(&config, ModelAnnotator).unwrap();
    assert_eq!(summary.written, 4);

    let out = data_lines(&fx.read("out.vcf"));
    let positions: Vec<&str> = out.iter().map(|l| l.split('\t').nth(1).unwrap()).collect();
    // AR_hom and AD_dn both rank 1:6 and keep input order; the rest rank 0
    assert_eq!(positions, vec!["200", "300", "100", "400"]);
    assert!(out[0].contains("GM=AR_hom"));
    assert!(out[1].contains("GM=AD_dn"));
    assert!(out[3].contains("GM_ERROR=malformed_genotype"));
    assert!(fx.no_scratch_left());
}

#[test]
fn test_vep_features_batch_and_pair_without_index() {
    let ped = "1\tfather\t0\t0\t1\t1\n1\tmother\t0\t0\t2\t1\n1\tchild\tfather\tmother\t1\t2\n";
    let text = "##fileformat=VCFv4.1\n\
        ##INFO=<ID=CSQ,Number=.,Type=String,Description=\"Consequence annotations from Ensembl VEP. Format: Allele|Consequence|IMPACT|SYMBOL|Gene\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tfather\tmother\tchild\n\
        1\t100\t.\tA\tG\t50\tPASS\tCSQ=G|missense_variant|MODERATE|GENE1|ENSG1\tGT:GQ\t0/1:40\t0/0:50\t0/1:30\n\
        1\t5000\t.\tA\tG\t50\tPASS\tCSQ=G|stop_gained|HIGH|GENE1|ENSG1\tGT:GQ\t0/0:40\t0/1:50\t0/1:30\n\
        1\t9000\t.\tA\tG\t50\tPASS\tCSQ=G|intron_variant|MODIFIER|GENE2|ENSG2\tGT:GQ\t0/0:40\t0/1:50\t0/1:30\n";
    let fx = Fixture::new();
    let ped = write(fx.dir.path(), "trio.ped", ped);
    let input = write(fx.dir.path(), "trio.vcf", text);
    let config = AnnotateConfig::new(&ped, InputSource::Path(input))
        .output(OutputTarget::Path(fx.dir.path().join("out.vcf")))
        .tmp_dir(Some(fx.scratch_parent.path().to_path_buf()))
        .index(IndexSource::Vep)
        .batch_size(1)
        .workers(2);
    let summary = pipeline::annotate(&config, ModelAnnotator).unwrap();
    // the two GENE1 variants share a batch despite the batch size of 1
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.written, 3);

    let out = data_lines(&fx.read("out.vcf"));
    let at = |pos: &str| {
        out.iter()
            .find(|l| l.split('\t').nth(1) == Some(pos))
            .unwrap()
            .clone()
    };
    assert!(at("100").contains("Comp=1_5000_A_G"));
    assert!(at("5000").contains("Comp=1_100_A_G"));
    assert!(at("100").contains("ANN=GENE1"));
    assert!(at("9000").contains("ANN=GENE2"));
    assert!(!at("9000").contains("Comp="));
    assert!(fx.no_scratch_left());
}

#[test]
fn test_workers_bounded_by_short_input() {
    let input = vec![line("1", 1, 3), line("1", 2, 1), line("1", 3, 2)];
    let fx = Fixture::new();
    let config = fx.config(&vcf(&input), "out.vcf").workers(8);
    let summary = pipeline::annotate(&config, Passthrough).unwrap();
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.workers, 1);
    assert_eq!(data_lines(&fx.read("out.vcf")).len(), 3);
}

// ==================== Failure Tests ====================

#[test]
fn test_worker_crash_terminates_run() {
    let mut input = random_lines(50, 5);
    input.push(line("crash", 1, 0));
    input.extend(random_lines(50, 6));
    let fx = Fixture::new();
    let config = fx
        .config(&vcf(&input), "out.vcf")
        .workers(2)
        .stall_timeout(Duration::from_secs(30));

    let start = Instant::now();
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(matches!(
        err,
        Error::WorkerFailure(WorkerFailure::Panicked { .. })
    ));
    assert!(!fx.dir.path().join("out.vcf").exists());
    assert!(fx.no_scratch_left());
}

#[test]
fn test_stalled_worker_is_fatal() {
    let input = vec![line("hang", 1, 0), line("1", 2, 0)];
    let fx = Fixture::new();
    let config = fx
        .config(&vcf(&input), "out.vcf")
        .workers(1)
        .stall_timeout(Duration::from_millis(300));

    let start = Instant::now();
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(4));
    assert!(matches!(
        err,
        Error::WorkerFailure(WorkerFailure::Stalled { .. })
    ));
    assert!(fx.no_scratch_left());
}

#[test]
fn test_stall_behind_full_queue_is_fatal() {
    let mut input = vec![line("hang", 1, 0)];
    input.extend(random_lines(20, 12));
    let fx = Fixture::new();
    let config = fx
        .config(&vcf(&input), "out.vcf")
        .workers(1)
        .batch_size(1)
        .queue_capacity(2)
        .stall_timeout(Duration::from_millis(300));

    let start = Instant::now();
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    // the hung batch sleeps for 5s; the watchdog must fire long before
    assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
    assert!(matches!(
        err,
        Error::WorkerFailure(WorkerFailure::Stalled { .. })
    ));
    assert!(!fx.dir.path().join("out.vcf").exists());
    assert!(fx.no_scratch_left());
}

#[test]
fn test_unsortable_key_is_fatal() {
    let mut input = random_lines(20, 9);
    input.push("1\t99\t.\tA\tC\t50\tPASS\tRankScore=1:high\tGT\t0/1".to_string());
    let fx = Fixture::new();
    let config = fx.config(&vcf(&input), "out.vcf").workers(2);
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    assert!(matches!(err, Error::SortError(_)), "{err}");
    assert!(!fx.dir.path().join("out.vcf").exists());
    assert!(fx.no_scratch_left());
}

#[test]
fn test_missing_input_fails_before_workers() {
    let fx = Fixture::new();
    let ped = write(fx.dir.path(), "family.ped", PED);
    let config = AnnotateConfig::new(&ped, InputSource::Path(Path::new("/no/such.vcf").into()))
        .tmp_dir(Some(fx.scratch_parent.path().to_path_buf()));
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    assert!(matches!(
        err,
        Error::InputError(InputError::MissingFile(_))
    ));
    assert!(fx.no_scratch_left());
}

#[test]
fn test_missing_prebuilt_index() {
    let fx = Fixture::new();
    let config = fx
        .config(&vcf(&random_lines(5, 1)), "out.vcf")
        .index(genmod::config::IndexSource::Prebuilt(
            fx.dir.path().join("genes.idx"),
        ));
    let err = pipeline::annotate(&config, Passthrough).unwrap_err();
    assert!(err.is_not_built());
    assert!(fx.no_scratch_left());
}
