//! End-to-end driver for one worker and for a whole in-process run.

use crate::alphabet::EffectiveAlphabet;
use crate::comm::Communicator;
use crate::config::Config;
use crate::construct::build;
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::local::LocalCluster;
use crate::memory::AllocTracker;
use crate::merge::{merge, LevelBits, MergeStats};
use crate::partition::{Partition, PartitionReader};
use crate::persist::{histogram_path, save_histogram, save_levels};
use crate::stats::{secs, RunStats, Timings, WorkerStats};
use crate::tree::NodeSizes;
use std::time::Instant;
use tracing::{debug, info};

/// Everything a worker holds once its levels are merged.
#[derive(Debug)]
pub struct Built {
    pub histogram: Histogram,
    pub alphabet: EffectiveAlphabet,
    pub levels: LevelBits,
    pub merge: MergeStats,
}

/// Turn this worker's shard of raw symbols into its ranges of the tree
/// levels: global histogram, effective transform, local construction, merge.
///
/// Must be called by all workers, each with its own shard.
pub fn build_levels<C: Communicator>(
    comm: &C,
    mut symbols: Vec<u64>,
    partition: Partition,
    effective: bool,
    discard: bool,
    tracker: &AllocTracker,
    timings: &mut Timings,
) -> Result<Built> {
    let master = comm.is_master();

    if master {
        info!("Compute histogram ...");
    }
    let t = Instant::now();
    let histogram = Histogram::compute(comm, &symbols)?;
    if histogram.total() != partition.total_size() as u64 {
        return Err(Error::Protocol(format!(
            "histogram counts {} symbols, input has {}",
            histogram.total(),
            partition.total_size()
        )));
    }
    timings.histogram = secs(t.elapsed());

    let alphabet = if effective {
        EffectiveAlphabet::identity_for(&histogram)?
    } else {
        EffectiveAlphabet::from_histogram(&histogram)
    };
    let height = alphabet.height();
    if master {
        info!(sigma = alphabet.sigma(), height, "Effective transform ...");
    }
    let t = Instant::now();
    alphabet.transform(&mut symbols)?;
    timings.effective = secs(t.elapsed());

    if height == 0 {
        if master {
            info!("Alphabet has at most one symbol, there are no levels to build");
        }
        return Ok(Built {
            histogram,
            alphabet,
            levels: LevelBits::new(partition, Vec::new()),
            merge: MergeStats::default(),
        });
    }

    if master {
        info!("Construct node bit vectors ...");
    }
    let t = Instant::now();
    // accounted for in bulk below
    let mut nodes = tracker.paused(|| build(&symbols, height))?;
    tracker.track_alloc(nodes.size_in_bytes());
    tracker.track_free(std::mem::size_of_val(&symbols[..]));
    drop(symbols);
    timings.construct = secs(t.elapsed());
    debug!(bytes = nodes.size_in_bytes(), "built node bit vectors");

    let global = NodeSizes::from_code_counts(nodes.shape(), &alphabet.code_counts(&histogram)?);
    let t = Instant::now();
    let (levels, merge_stats) = merge(comm, &mut nodes, &global, &partition, tracker, discard)?;
    tracker.track_free(nodes.size_in_bytes());
    drop(nodes);
    timings.merge = secs(t.elapsed());

    Ok(Built {
        histogram,
        alphabet,
        levels,
        merge: merge_stats,
    })
}

/// Run one worker: read its shard, build and merge, and save its levels.
pub fn run_worker<C: Communicator + Sync>(comm: &C, config: &Config) -> Result<WorkerStats> {
    let rank = comm.rank();
    let master = comm.is_master();
    let tracker = AllocTracker::new();
    let mut timings = Timings::default();

    let t = Instant::now();
    let mut reader = PartitionReader::open(
        &config.input,
        config.width,
        config.prefix,
        comm.num_workers(),
        rank,
        config.read_buffer,
    )?;
    let partition = *reader.partition();
    let symbols = reader.read_all()?;
    tracker.track_alloc(std::mem::size_of_val(&symbols[..]));
    timings.input = secs(t.elapsed());
    if master {
        info!(
            symbols = partition.total_size(),
            workers = comm.num_workers(),
            per_worker = partition.size_per_worker(),
            "Read input {} ...",
            config.input.display()
        );
    }
    debug!(local = symbols.len(), "read shard");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads_per_worker())
        .thread_name(move |i| format!("worker-{}-{}", rank, i))
        .build()?;
    let built = pool.install(|| {
        build_levels(
            comm,
            symbols,
            partition,
            config.effective,
            config.discard,
            &tracker,
            &mut timings,
        )
    })?;

    let mut stats = WorkerStats {
        rank,
        local_symbols: partition.local_num(),
        sigma: built.alphabet.sigma(),
        height: built.alphabet.height(),
        bytes_sent: built.merge.bytes_sent,
        messages_sent: built.merge.messages_sent,
        ..WorkerStats::default()
    };

    if let Some(output) = &config.output {
        // every worker must be done merging before anything is written
        comm.barrier()?;
        if master {
            info!("Save to {} ...", output.display());
        }
        let t = Instant::now();
        stats.bytes_written = save_levels(output, &built.levels)?;
        stats.bits_written = built.levels.num_bits();
        if master {
            stats.bytes_written += save_histogram(&histogram_path(output), &built.histogram)?;
        }
        timings.save = secs(t.elapsed());
    }

    stats.timings = timings;
    stats.peak_memory = tracker.peak();
    Ok(stats)
}

/// Run all workers of `config` in this process and combine their statistics.
pub fn run(config: &Config) -> Result<RunStats> {
    config.validate()?;
    let cluster = LocalCluster::new(config.workers).recv_timeout(config.recv_timeout);
    let workers = cluster.run(|comm| run_worker(comm, config))?;
    Ok(RunStats::combine(&workers, config.threads_per_worker()))
}
