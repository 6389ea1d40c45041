//! Run orchestration
//!
//! A [`PipelineRun`] walks through `INIT → RUNNING → DRAINING → SORTING →
//! WRITING → DONE`. Any stage may fail instead; the scratch directory is
//! always gone by the time the error reaches the caller.
//!
//! The `annotate` run uses one producer (the calling thread), `N` workers
//! and one collector. The standalone `sort` run spools on the calling thread
//! and sorts the whole input as a single partition.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::unbounded;
use log::{debug, error, info, warn};

use crate::{
    annotate::{declare_fields, AnnotationContext, AnnotationEngine, VepLayout},
    collect::Collector,
    config::{AnnotateConfig, IndexSource, SortConfig},
    error::{Error, ResourceError, Result, WorkerFailure},
    header::Header,
    index::AnnotationIndex,
    key::SortKey,
    logging::{format_duration, PhaseTimer},
    parallel::{resolve_workers, Collected, WorkerPool},
    pedigree::Family,
    queue::TaskQueue,
    read::{Batcher, VariantReader},
    record::Batch,
    score::{ChainedScores, ScoreSource, TsvScoreSource},
    scratch::ScratchSpace,
    sort::{spool::SpoolWriter, SortStats},
    write::{OutputTarget, OutputWriter},
};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Running,
    Draining,
    Sorting,
    Writing,
    Done,
    Failed,
}
impl RunState {
    /// Whether the lifecycle allows moving from `self` to `next`
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        use RunState::{Done, Draining, Failed, Init, Running, Sorting, Writing};
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Init, Running) | (Running, Draining | Sorting) | (Draining, Sorting) => true,
            (Sorting, Writing) | (Writing, Done) => true,
            _ => false,
        }
    }
}
impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Draining => "DRAINING",
            Self::Sorting => "SORTING",
            Self::Writing => "WRITING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// State tracker of one run
#[derive(Debug)]
pub struct PipelineRun {
    state: RunState,
    history: Vec<RunState>,
    started: Instant,
}
impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}
impl PipelineRun {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RunState::Init,
            history: vec![RunState::Init],
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited so far, in order
    #[must_use]
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Run state {} -> {next}", self.state);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Mark the run failed after its resources were released
    pub fn fail(&mut self, err: &Error) {
        error!("Run failed during {} ({}): {err}", self.state, err.stage());
        if self.state.can_advance_to(RunState::Failed) {
            self.state = RunState::Failed;
            self.history.push(RunState::Failed);
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What a finished run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Data records read from the input
    pub records: u64,
    /// Records written to the output
    pub written: u64,
    pub batches: u64,
    pub workers: usize,
    /// Chromosomes in output order
    pub chromosomes: Vec<String>,
    pub sort: SortStats,
}

/// Annotate a variant file and write it sorted by rank score
///
/// Output is per chromosome, in the order chromosomes first appear in the
/// input; within a chromosome records follow the configured sort order.
pub fn annotate<E: AnnotationEngine + 'static>(
    config: &AnnotateConfig,
    engine: E,
) -> Result<RunSummary> {
    let mut run = PipelineRun::new();
    let result = run_annotate(&mut run, config, Arc::new(engine));
    finalize(&mut run, result)
}

/// Sort a variant file by rank score as a single partition
pub fn sort(config: &SortConfig) -> Result<RunSummary> {
    let mut run = PipelineRun::new();
    let result = run_sort(&mut run, config);
    finalize(&mut run, result)
}

fn finalize(run: &mut PipelineRun, result: Result<RunSummary>) -> Result<RunSummary> {
    match result.and_then(|summary| run.advance(RunState::Done).map(|()| summary)) {
        Ok(summary) => {
            info!(
                "Wrote {} variant(s) in {}",
                summary.written,
                format_duration(run.elapsed())
            );
            Ok(summary)
        }
        Err(err) => {
            run.fail(&err);
            Err(err)
        }
    }
}

/// Resolve the gene and exon indexes
fn load_index(config: &AnnotateConfig) -> Result<AnnotationIndex> {
    match &config.index {
        IndexSource::Annotation { path, kind } => {
            AnnotationIndex::build(path, *kind, config.splice_padding)
        }
        IndexSource::Prebuilt(path) => {
            let index = AnnotationIndex::load(path)?;
            info!(
                "Loaded {} genes and {} exons from {}",
                index.genes.len(),
                index.exons.len(),
                path.display()
            );
            Ok(index)
        }
        IndexSource::Vep => {
            info!("Taking gene features from VEP annotations");
            Ok(AnnotationIndex::default())
        }
        IndexSource::Empty => {
            warn!("No annotation given; variants will not be assigned to genes");
            Ok(AnnotationIndex::default())
        }
    }
}

fn load_scores(paths: &[PathBuf]) -> Result<Option<Box<dyn ScoreSource>>> {
    let sources = paths
        .iter()
        .map(|path| TsvScoreSource::from_path(path).map(|s| Box::new(s) as Box<dyn ScoreSource>))
        .collect::<Result<Vec<_>>>()?;
    if sources.is_empty() {
        return Ok(None);
    }
    Ok(Some(Box::new(ChainedScores::new(sources))))
}

/// Batch records until `limit` batches are buffered
///
/// The flag is set when the input ran out first, in which case the buffered
/// batches are the whole workload.
fn prefetch<E: AnnotationEngine + ?Sized>(
    reader: &mut VariantReader,
    batcher: &mut Batcher<'_, E>,
    limit: usize,
) -> Result<(Vec<Batch>, bool)> {
    let mut batches = Vec::with_capacity(limit);
    while batches.len() < limit {
        let Some(record) = reader.next_record()? else {
            batches.extend(batcher.finish());
            return Ok((batches, true));
        };
        batches.extend(batcher.push(record));
    }
    Ok((batches, false))
}

/// Enqueue the prefetched batches, then read, batch and enqueue the rest
///
/// Returns the number of batches.
fn produce<E: AnnotationEngine + ?Sized>(
    reader: &mut VariantReader,
    batcher: &mut Batcher<'_, E>,
    prefetched: Vec<Batch>,
    queue: &TaskQueue<Batch>,
) -> Result<u64> {
    let mut batches = 0;
    for batch in prefetched {
        queue.enqueue(batch)?;
        batches += 1;
    }
    while let Some(record) = reader.next_record()? {
        if let Some(batch) = batcher.push(record) {
            queue.enqueue(batch)?;
            batches += 1;
        }
    }
    if let Some(batch) = batcher.finish() {
        queue.enqueue(batch)?;
        batches += 1;
    }
    Ok(batches)
}

fn run_annotate<E: AnnotationEngine + 'static>(
    run: &mut PipelineRun,
    config: &AnnotateConfig,
    engine: Arc<E>,
) -> Result<RunSummary> {
    // Collaborators are loaded before any worker starts
    let family = Family::load(&config.pedigree, config.family_id.as_deref())?;
    let mut reader = VariantReader::open(&config.input)?;
    let index = load_index(config)?;
    let scores = load_scores(&config.score_files)?;
    let scored = scores.is_some();
    let family_id = family.id.clone();
    let mut ctx = AnnotationContext::new(
        family,
        reader.header().samples(),
        index,
        scores,
        config.settings,
    );
    if config.index == IndexSource::Vep {
        ctx = ctx.with_vep(VepLayout::from_header(reader.header()));
    }
    let ctx = Arc::new(ctx);

    // No more workers than there are batches, when the input is that short
    let mut batcher = Batcher::new(engine.as_ref(), ctx.as_ref(), config.batch_size);
    let wanted = resolve_workers(config.workers, None);
    let (prefetched, exhausted) = prefetch(&mut reader, &mut batcher, wanted)?;
    let num_workers = resolve_workers(config.workers, exhausted.then_some(prefetched.len()));

    let scratch = ScratchSpace::new(config.tmp_dir.as_deref())?;
    let queue = Arc::new(TaskQueue::new(config.queue_capacity).stall_timeout(config.stall_timeout));
    let (tx, rx) = unbounded();

    run.advance(RunState::Running)?;
    let timer = PhaseTimer::start("Annotating variants");
    let collector = Collector::spawn(
        rx,
        scratch.path(),
        Some(family_id),
        config.sort.compression,
    );
    let pool = WorkerPool::spawn(num_workers, &queue, &engine, &ctx, &tx);

    let produced = produce(&mut reader, &mut batcher, prefetched, &queue);

    // Shutdown: one sentinel per worker, then wait for every acknowledgement
    let drained = produced.and_then(|batches| {
        queue.enqueue_sentinels(num_workers)?;
        run.advance(RunState::Draining)?;
        queue.join_all(config.stall_timeout)?;
        Ok(batches)
    });
    let drained = match drained {
        Ok(batches) => pool.join().map(|()| batches).map_err(Error::from),
        Err(err) => {
            // the producer only sees `Aborted`; the latched failure is the cause
            let err = match (err, queue.failure()) {
                (Error::WorkerFailure(WorkerFailure::Aborted), Some(cause)) => cause.into(),
                (err, _) => err,
            };
            queue.fail(WorkerFailure::Aborted);
            if matches!(err, Error::WorkerFailure(WorkerFailure::Stalled { .. })) {
                pool.detach();
            } else if let Err(failure) = pool.join() {
                debug!("Worker exit after abort: {failure}");
            }
            Err(err)
        }
    };

    let signal = if drained.is_ok() {
        Collected::Close
    } else {
        Collected::Abort
    };
    if tx.send(signal).is_err() {
        debug!("Collector stopped before the close signal");
    }
    drop(tx);
    let collected = collector.join();

    let (batches, registry) = match (drained, collected) {
        (Ok(batches), Ok(registry)) => (batches, registry),
        (Err(err), Ok(_) | Err(Error::WorkerFailure(WorkerFailure::Aborted))) => {
            return Err(err)
        }
        // a collector failure is the root cause of what the workers saw
        (_, Err(err)) => return Err(err),
    };
    let records = reader.records_read();
    if registry.total_records() != records {
        return Err(WorkerFailure::Lost {
            expected: records,
            collected: registry.total_records(),
        }
        .into());
    }
    timer.finish(records);

    // Sort every partition before anything is written
    run.advance(RunState::Sorting)?;
    let timer = PhaseTimer::start("Sorting partitions");
    let sorter = config.sort.sorter();
    let chromosomes = reader.chromosomes().to_vec();
    let mut stats = SortStats::default();
    let mut sorted = Vec::with_capacity(chromosomes.len());
    for chrom in &chromosomes {
        let Some(partition) = registry.get(chrom) else {
            continue;
        };
        let output = scratch.file("sorted", "txt");
        debug!("Sorting {} record(s) of {chrom}", partition.records());
        stats += sorter.sort(partition.path(), registry.compressed(), &output, &scratch)?;
        remove_spool(partition.path());
        sorted.push(output);
    }
    timer.finish(stats.output_records);

    run.advance(RunState::Writing)?;
    let mut header = reader.into_header();
    declare_fields(&mut header, scored);
    let written = write_output(&config.output, &header, &sorted)?;

    scratch.close()?;
    Ok(RunSummary {
        records,
        written,
        batches,
        workers: num_workers,
        chromosomes,
        sort: stats,
    })
}

fn run_sort(run: &mut PipelineRun, config: &SortConfig) -> Result<RunSummary> {
    let mut reader = VariantReader::open(&config.input)?;
    let scratch = ScratchSpace::new(config.tmp_dir.as_deref())?;

    run.advance(RunState::Running)?;
    let timer = PhaseTimer::start("Spooling variants");
    let spool_path = scratch.file("input", "spool");
    let spool_err = |source| ResourceError::Spool {
        path: spool_path.clone(),
        source,
    };
    let mut spool = SpoolWriter::create(&spool_path, config.sort.compression).map_err(spool_err)?;
    while let Some(record) = reader.next_record()? {
        let key = SortKey::from_record(&record, config.family_id.as_deref())?;
        spool
            .push(key, record.ordinal(), record.line())
            .map_err(spool_err)?;
    }
    let records = spool.finish().map_err(spool_err)?;
    timer.finish(records);

    run.advance(RunState::Sorting)?;
    let sorted = scratch.file("sorted", "txt");
    let stats = config.sort.sorter().sort(
        &spool_path,
        config.sort.compression > 0,
        &sorted,
        &scratch,
    )?;
    remove_spool(&spool_path);

    run.advance(RunState::Writing)?;
    let chromosomes = reader.chromosomes().to_vec();
    let header = reader.into_header();
    let written = write_output(&config.output, &header, &[sorted])?;

    scratch.close()?;
    Ok(RunSummary {
        records,
        written,
        batches: 0,
        workers: 0,
        chromosomes,
        sort: stats,
    })
}

fn write_output(target: &OutputTarget, header: &Header, sorted: &[PathBuf]) -> Result<u64> {
    let mut writer = OutputWriter::create(target)?;
    writer.write_header(header)?;
    for path in sorted {
        writer.copy_records(path)?;
    }
    writer.finish()
}

fn remove_spool(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!("Could not remove {}: {e}", path.display());
    }
}
