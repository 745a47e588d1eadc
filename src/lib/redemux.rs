//! Re-demultiplexing of the undetermined reads of a run.
//!
//! [`ReDemux`] holds one [`IndexCatalog`] per lane, built from operator rules like `3:ATCACG`
//! before any read is looked at.  [`ReDemux::run`] then, lane by lane and read number by read
//! number, streams every undetermined read through the lane's [`Matcher`] and writes the reads
//! with a [`MatchVerdict::Unique`] verdict to the output of their sample.  Other reads are only
//! counted.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use seq_io::{
    fastq::{Record, RefRecord},
    BaseRecord,
};
use thiserror::Error;

use crate::{
    index_catalog::{IndexCatalog, IndexError, DEFAULT_INDEX_LENGTH, DEFAULT_MAX_MISMATCHES},
    locator::UndeterminedFileLocator,
    matcher::{MatchVerdict, Matcher, MatcherKind},
    metrics::{LaneReadMetrics, ReDemuxMetrics, SampleReadMetrics, UnmatchedCounter},
    sample_metadata::SampleRef,
    sample_sheet::SampleLookup,
    sample_writer::SampleOutputRegistry,
    utils::{embedded_barcode, open_fastq_reader, s, Compression, CompressionSettings},
};

/// The default number of lanes of a flow cell.
pub const DEFAULT_MAX_LANES: usize = 8;

/// The errors of configuring and running the re-demultiplexing.
#[derive(Error, Debug)]
pub enum ReDemuxError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Invalid lane {lane}, must be between 1 and {max_lanes}")]
    InvalidLane { lane: usize, max_lanes: usize },

    #[error("Invalid index rule `{rule}`, expected <lane>:<index>, e.g. 3:ATCACG")]
    InvalidRule { rule: String },

    #[error("No undetermined FASTQ found for lane {lane} in {dir}")]
    NoUndeterminedFilesFound { lane: usize, dir: String },

    #[error("Invalid read number {read_number} on lane {lane}, must be between 1 and {max_read_number}: {file}")]
    InvalidReadNumber { lane: usize, read_number: usize, max_read_number: usize, file: String },

    #[error("The barcode `{barcode}` of read {read_name} in {file} has not the expected length of {expected}")]
    BarcodeLengthMismatch { file: String, read_name: String, barcode: String, expected: usize },
}

/// The settings of a [`ReDemux`].
#[derive(Debug, Clone)]
pub struct ReDemuxConfig {
    /// The length of the indexes and of the barcodes in the read names.
    pub index_length: usize,
    /// The number of mismatches allowed when resolving an exact index to a sample.
    pub max_mismatches: usize,
    /// The largest valid lane number.
    pub max_lanes: usize,
    /// The number of lanes processed at the same time.
    pub threads: usize,
    /// The settings of compressed output.
    pub compression: CompressionSettings,
    /// The number of most frequent unmatched barcodes to write per lane, `0` to disable.
    pub most_unmatched_to_output: usize,
    /// Use this matcher for every lane instead of choosing one.
    pub override_matcher: Option<MatcherKind>,
}

impl Default for ReDemuxConfig {
    fn default() -> Self {
        Self {
            index_length: DEFAULT_INDEX_LENGTH,
            max_mismatches: DEFAULT_MAX_MISMATCHES,
            max_lanes: DEFAULT_MAX_LANES,
            threads: 1,
            compression: CompressionSettings::default(),
            most_unmatched_to_output: 1_000,
            override_matcher: None,
        }
    }
}

/// Parses a `<lane>:<index>` rule into the lane and the (raw) index.
pub fn parse_rule(rule: &str) -> Result<(usize, &str), ReDemuxError> {
    let invalid = || ReDemuxError::InvalidRule { rule: rule.to_string() };
    let (lane, index) = rule.split(':').collect_tuple::<(&str, &str)>().ok_or_else(invalid)?;
    let lane = lane.trim().parse::<usize>().map_err(|_| invalid())?;
    Ok((lane, index))
}

/// Re-demultiplexes the undetermined reads of a run, lane by lane.
pub struct ReDemux<'a, S: SampleLookup + Sync + ?Sized> {
    samples: &'a S,
    config: ReDemuxConfig,
    catalogs: BTreeMap<usize, IndexCatalog>,
}

impl<'a, S: SampleLookup + Sync + ?Sized> ReDemux<'a, S> {
    pub fn new(samples: &'a S, config: ReDemuxConfig) -> Self {
        Self { samples, config, catalogs: BTreeMap::new() }
    }

    /// The catalogs, by lane.
    pub fn catalogs(&self) -> &BTreeMap<usize, IndexCatalog> {
        &self.catalogs
    }

    /// Adds an index given as `<lane>:<index>`.
    pub fn add_rule(&mut self, rule: &str) -> Result<SampleRef, ReDemuxError> {
        let (lane, index) = parse_rule(rule)?;
        self.add_index(lane, index)
    }

    /// Adds an index to the catalog of the lane, resolving it to a sample of that lane.
    pub fn add_index(&mut self, lane: usize, index: &str) -> Result<SampleRef, ReDemuxError> {
        if lane < 1 || lane > self.config.max_lanes {
            return Err(ReDemuxError::InvalidLane { lane, max_lanes: self.config.max_lanes });
        }
        let (index_length, max_mismatches) =
            (self.config.index_length, self.config.max_mismatches);
        let catalog = self
            .catalogs
            .entry(lane)
            .or_insert_with(|| IndexCatalog::new(lane, index_length, max_mismatches));
        let sample = catalog.add_index(index, self.samples);
        if catalog.is_empty() {
            self.catalogs.remove(&lane);
        }
        Ok(sample?)
    }

    /// Re-demultiplexes every lane with indexes, writing the outputs into `output_dir`.
    ///
    /// Lanes run concurrently on a pool of [`ReDemuxConfig::threads`] threads.  The first error
    /// aborts the run; the outputs already written are kept.
    pub fn run<L: UndeterminedFileLocator + Sync>(
        &self,
        locator: &L,
        output_dir: &Path,
    ) -> Result<ReDemuxMetrics> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads.max(1))
            .build()
            .context("Failed to create the lane thread pool")?;

        let catalogs: Vec<&IndexCatalog> = self.catalogs.values().collect();
        let per_lane: Result<Vec<ReDemuxMetrics>> = pool.install(|| {
            catalogs
                .par_iter()
                .map(|catalog| self.process_lane(catalog, locator, output_dir))
                .collect()
        });

        let mut metrics = ReDemuxMetrics::default();
        for lane_metrics in per_lane? {
            metrics.update_with(lane_metrics);
        }
        Ok(metrics)
    }

    /// Re-demultiplexes one lane, one read number at a time.
    fn process_lane<L: UndeterminedFileLocator>(
        &self,
        catalog: &IndexCatalog,
        locator: &L,
        output_dir: &Path,
    ) -> Result<ReDemuxMetrics> {
        let lane = catalog.lane();
        let mut metrics = ReDemuxMetrics::default();

        let read_numbers = match locator.read_numbers(lane)? {
            Some(read_numbers) => read_numbers,
            None => {
                warn!("No undetermined reads directory for lane {}, skipping", lane);
                metrics.skipped_lanes.push(lane);
                return Ok(metrics);
            }
        };

        let kind = MatcherKind::choose(catalog, self.config.override_matcher);
        debug!("Using {:?} matcher for lane {}", kind, lane);
        let matcher = kind.build(catalog);

        let mut unmatched =
            (self.config.most_unmatched_to_output > 0).then(UnmatchedCounter::default);

        for (i, read_number) in read_numbers.into_iter().enumerate() {
            info!("Processing lane {} read {}", lane, read_number);
            let files = locator.files(lane, read_number)?;
            // The same barcodes are in every read number, count them once.
            let counter = unmatched.as_mut().filter(|_| i == 0);
            let (lane_read, per_sample) = self.process_read(
                catalog,
                matcher.as_ref(),
                read_number,
                &files,
                output_dir,
                counter,
            )?;
            info!(
                "Lane {} read {}: {} reads, {} matched, {} unmatched, {} ambiguous",
                lane,
                read_number,
                lane_read.total_reads,
                lane_read.matched_reads,
                lane_read.unmatched_reads,
                lane_read.ambiguous_reads
            );
            metrics.per_read.push(lane_read);
            metrics.per_sample.extend(per_sample);
        }

        if let Some(unmatched) = unmatched {
            unmatched.to_file(
                output_dir,
                self.config.most_unmatched_to_output,
                &format!("L00{}_", lane),
            )?;
        }
        Ok(metrics)
    }

    /// Streams the files of one read number, then closes the outputs, also when streaming failed.
    fn process_read(
        &self,
        catalog: &IndexCatalog,
        matcher: &(dyn Matcher + Send + Sync),
        read_number: usize,
        files: &[PathBuf],
        output_dir: &Path,
        unmatched: Option<&mut UnmatchedCounter>,
    ) -> Result<(LaneReadMetrics, Vec<SampleReadMetrics>)> {
        let lane = catalog.lane();
        let compression = files.first().map_or(Compression::None, Compression::from_path);
        let mut registry = SampleOutputRegistry::new(
            self.samples,
            output_dir,
            lane,
            read_number,
            compression,
            self.config.compression,
        );
        let mut metrics = LaneReadMetrics::new(lane, read_number);

        let streamed =
            self.stream_files(catalog, matcher, files, &mut registry, &mut metrics, unmatched);
        let closed = registry.close_all();
        streamed?;

        let per_sample = closed?
            .into_iter()
            .map(|output| {
                SampleReadMetrics::new(
                    self.samples.sample(output.sample),
                    lane,
                    read_number,
                    output.records,
                    &output.path,
                )
            })
            .collect();
        Ok((metrics, per_sample))
    }

    fn stream_files(
        &self,
        catalog: &IndexCatalog,
        matcher: &(dyn Matcher + Send + Sync),
        files: &[PathBuf],
        registry: &mut SampleOutputRegistry<S>,
        metrics: &mut LaneReadMetrics,
        mut unmatched: Option<&mut UnmatchedCounter>,
    ) -> Result<()> {
        let mut barcode: Vec<u8> = Vec::with_capacity(catalog.index_length());
        for file in files {
            debug!("Reading {}", file.display());
            let mut reader = open_fastq_reader(file)?;
            metrics.input_files += 1;

            while let Some(record) = reader.next() {
                let record: RefRecord =
                    record.with_context(|| format!("Failed to read from {}", file.display()))?;

                barcode.clear();
                barcode.extend(embedded_barcode(record.head()).iter().map(u8::to_ascii_uppercase));
                if barcode.len() != catalog.index_length() {
                    return Err(ReDemuxError::BarcodeLengthMismatch {
                        file: file.display().to_string(),
                        read_name: s(record.head()),
                        barcode: s(&barcode),
                        expected: catalog.index_length(),
                    }
                    .into());
                }

                let verdict = matcher.find(&barcode);
                metrics.update_with(&verdict);
                match verdict {
                    MatchVerdict::Unique(sample) => {
                        registry.route_to(sample, record.head(), record.seq(), record.qual())?;
                    }
                    MatchVerdict::NoMatch => {
                        if let Some(counter) = unmatched.as_deref_mut() {
                            counter.insert(&barcode);
                        }
                    }
                    MatchVerdict::Ambiguous => (),
                }
            }
        }
        Ok(())
    }
}
