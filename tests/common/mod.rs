#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use genmod::{
    annotate::{AnnotationContext, AnnotationEngine},
    error::AnnotationError,
    VariantRecord,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};

pub const HEADER: &str = "##fileformat=VCFv4.1\n\
    #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

pub const PED: &str = "1\tS1\t0\t0\t1\t2\n";

/// Leaves records untouched; panics on chromosome `crash`, sleeps on `hang`
pub struct Passthrough;
impl AnnotationEngine for Passthrough {
    fn annotate(
        &self,
        records: &mut [VariantRecord],
        _ctx: &AnnotationContext,
    ) -> Vec<Result<(), AnnotationError>> {
        records
            .iter()
            .map(|record| {
                match record.chrom() {
                    "crash" => panic!("simulated worker crash"),
                    "hang" => std::thread::sleep(std::time::Duration::from_secs(5)),
                    _ => {}
                }
                Ok(())
            })
            .collect()
    }
}

pub fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// A variant line with a bare rank score
pub fn line(chrom: &str, pos: u64, score: i64) -> String {
    format!("{chrom}\t{pos}\t.\tA\tC\t50\tPASS\tDP=10;RankScore=1:{score}\tGT\t0/1")
}

/// Random lines over a few chromosomes, interleaved
pub fn random_lines(n: usize, seed: u64) -> Vec<String> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let chrom = ["1", "2", "X"][rng.random_range(0..3)];
            line(chrom, i as u64 + 1, rng.random_range(-5..15))
        })
        .collect()
}

pub fn vcf(lines: &[String]) -> String {
    let mut text = HEADER.to_string();
    for l in lines {
        text.push_str(l);
        text.push('\n');
    }
    text
}

/// Data lines of an output file
pub fn data_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn score(line: &str) -> i64 {
    let info = line.split('\t').nth(7).unwrap();
    let entry = info
        .split(';')
        .find_map(|kv| kv.strip_prefix("RankScore="))
        .unwrap();
    entry.rsplit_once(':').unwrap().1.parse().unwrap()
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}
