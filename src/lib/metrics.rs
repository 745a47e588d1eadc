//! Functionality pertaining to the collection of metrics during re-demultiplexing.
//!
//! For each (lane, read number) scanned a [`LaneReadMetrics`] counts the reads seen and their
//! verdicts, and for each sample output written a [`SampleReadMetrics`] records the number of
//! reads routed to it.  Reads that are not routed (no match, or ambiguous) are only visible here.
//!
//! An [`UnmatchedCounter`] keeps track of the most frequently seen unmatched barcodes of a lane.
//! Each time the number of keys exceeds a set limit the barcodes are sorted by most to least
//! frequent, keeping only the top N barcodes and dropping the rest.
//!
//! All metrics are writable to files.

use std::path::Path;

use ahash::AHashMap;
use anyhow::Result;
use bstr::BString;
use fgoxide::io::DelimFile;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{matcher::MatchVerdict, sample_metadata::SampleMetadata};

/// The max number of keys the hash can retain before re-sizing
pub const DEFAULT_UNMATCHED_MAX_COUNTER_SIZE: usize = 5_000_000;
/// The number of keys to downsize to
pub const DEFAULT_UNMATCHED_DOWNSIZE_TO: usize = 5_000;

/// The name of the file with one [`LaneReadMetrics`] per (lane, read number).
pub const METRICS_FILE_NAME: &str = "redemux_metrics.tsv";
/// The name of the file with one [`SampleReadMetrics`] per sample output.
pub const PER_SAMPLE_METRICS_FILE_NAME: &str = "redemux_per_sample_metrics.tsv";

/// Helper type to reduce type complexity.
type RawBarcode = Vec<u8>;

/// Container for tracking the number of times each unmatched barcode has been seen.
pub struct UnmatchedCounter {
    /// The unmatched barcode counter.
    unmatched_counter: AHashMap<RawBarcode, i64>,
    /// The max number of keys that can be held before downsizing.
    max_counter_size: usize,
    /// The number of keys to retain when downsizing.
    downsize_to: usize,
}

impl Default for UnmatchedCounter {
    fn default() -> Self {
        Self::new(DEFAULT_UNMATCHED_MAX_COUNTER_SIZE, DEFAULT_UNMATCHED_DOWNSIZE_TO)
    }
}

impl UnmatchedCounter {
    /// Create a new [`UnmatchedCounter`].
    ///
    /// # Argument
    /// - `max_counter_size` - the max number of keys the internal hashmap can contain before downsizing.
    /// - `downsize_to` - the number of keys to retain when downsizing.
    pub fn new(max_counter_size: usize, downsize_to: usize) -> Self {
        Self { unmatched_counter: AHashMap::new(), max_counter_size, downsize_to }
    }

    /// Insert a barcode in the collector and check if the criteria has been met for downsizing.
    pub fn insert(&mut self, barcode: &[u8]) {
        if let Some(count) = self.unmatched_counter.get_mut(barcode) {
            *count += 1;
            return;
        }
        // If we have hit the max_counter_size, and we are about to add one more, downsize to as to not hit
        // max_counter_size + 1
        if self.unmatched_counter.len() == self.max_counter_size {
            self.downsize();
        }
        self.unmatched_counter.insert(barcode.to_vec(), 1);
    }

    /// Downsize the counter to `downsize_to` keys.
    ///
    /// Note, this is requires sorting they map by values and creation of a new hashmap.
    pub fn downsize(&mut self) {
        let new = AHashMap::with_capacity(self.downsize_to);
        let previous = std::mem::replace(&mut self.unmatched_counter, new);
        self.unmatched_counter.extend(
            previous
                .into_iter()
                .sorted_unstable_by_key(|(_k, count)| -count)
                .take(self.downsize_to),
        );
    }

    pub fn len(&self) -> usize {
        self.unmatched_counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unmatched_counter.is_empty()
    }

    /// The top `n` barcodes, most frequent first (ties broken by barcode).
    pub(crate) fn most_frequent(&self, n: usize) -> Vec<BarcodeCount> {
        self.unmatched_counter
            .iter()
            .map(|(barcode, count)| BarcodeCount::new(BString::from(barcode.as_slice()), *count as isize))
            .sorted_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.barcode.cmp(&b.barcode)))
            .take(n)
            .collect()
    }

    /// Write the top `n` unmatched barcodes to a `<prefix>most_frequent_unmatched.tsv` file in the specified directory.
    pub fn to_file<P: AsRef<Path>>(&self, output_dir: P, n: usize, prefix: &str) -> Result<()> {
        let filename = [prefix.to_string(), "most_frequent_unmatched.tsv".to_string()].concat();
        let output_path = output_dir.as_ref().join(filename);
        let delim = DelimFile::default();
        delim.write_tsv(&output_path, self.most_frequent(n))?;
        Ok(())
    }
}

/// A helper struct for serializing and deserializing barcode counts.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct BarcodeCount {
    /// The barcode.
    pub(crate) barcode: String,
    /// the count of the barcode.
    pub(crate) count: isize,
}

impl BarcodeCount {
    /// Create a new [`BarcodeCount`] instance.
    fn new(barcode: BString, count: isize) -> Self {
        Self { barcode: barcode.to_string(), count }
    }
}

/// The read counts for one read number of one lane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneReadMetrics {
    /// The lane.
    pub lane: usize,
    /// The read number (1 or 2).
    pub read: usize,
    /// The number of undetermined FASTQ files read.
    pub input_files: usize,
    /// The number of reads seen.
    pub total_reads: usize,
    /// The number of reads routed to a sample.
    pub matched_reads: usize,
    /// The number of reads not matching any index.
    pub unmatched_reads: usize,
    /// The number of reads matching the indexes of more than one sample.
    pub ambiguous_reads: usize,
}

impl LaneReadMetrics {
    pub fn new(lane: usize, read: usize) -> Self {
        Self { lane, read, ..Self::default() }
    }

    /// Count one read with the given verdict.
    #[inline]
    pub fn update_with(&mut self, verdict: &MatchVerdict) {
        self.total_reads += 1;
        match verdict {
            MatchVerdict::Unique(_) => self.matched_reads += 1,
            MatchVerdict::NoMatch => self.unmatched_reads += 1,
            MatchVerdict::Ambiguous => self.ambiguous_reads += 1,
        }
    }

    /// The reads that were not written to any output.
    pub fn dropped_reads(&self) -> usize {
        self.unmatched_reads + self.ambiguous_reads
    }
}

/// The reads written to one sample output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleReadMetrics {
    pub lane: usize,
    pub read: usize,
    pub sample_id: String,
    /// The name the output file is named after.
    pub sample_name: String,
    pub project: String,
    pub index: String,
    /// The number of reads written.
    pub reads: usize,
    /// The path of the output file.
    pub path: String,
}

impl SampleReadMetrics {
    pub fn new(
        sample: &SampleMetadata,
        lane: usize,
        read: usize,
        reads: usize,
        path: &Path,
    ) -> Self {
        Self {
            lane,
            read,
            sample_id: sample.sample_id.clone(),
            sample_name: sample.demultiplexing_name().to_string(),
            project: sample.project_name().to_string(),
            index: sample.index_name().to_string(),
            reads,
            path: path.to_string_lossy().to_string(),
        }
    }
}

/// The metrics of a whole re-demultiplexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReDemuxMetrics {
    /// One entry per (lane, read number), in lane then read order.
    pub per_read: Vec<LaneReadMetrics>,
    /// One entry per sample output file.
    pub per_sample: Vec<SampleReadMetrics>,
    /// Lanes with indexes but without an undetermined reads directory.
    pub skipped_lanes: Vec<usize>,
}

impl ReDemuxMetrics {
    /// Append the metrics of another lane.
    pub fn update_with(&mut self, other: Self) {
        self.per_read.extend(other.per_read);
        self.per_sample.extend(other.per_sample);
        self.skipped_lanes.extend(other.skipped_lanes);
    }

    pub fn total_reads(&self) -> usize {
        self.per_read.iter().map(|m| m.total_reads).sum()
    }

    pub fn matched_reads(&self) -> usize {
        self.per_read.iter().map(|m| m.matched_reads).sum()
    }

    pub fn dropped_reads(&self) -> usize {
        self.per_read.iter().map(LaneReadMetrics::dropped_reads).sum()
    }

    /// Write the [`METRICS_FILE_NAME`] and [`PER_SAMPLE_METRICS_FILE_NAME`] files.
    pub fn write_metrics_files<P: AsRef<Path>>(&self, output_dir: P) -> Result<()> {
        let delim = DelimFile::default();

        let output_path = output_dir.as_ref().join(METRICS_FILE_NAME);
        delim.write_tsv(&output_path, self.per_read.iter())?;

        let output_path = output_dir.as_ref().join(PER_SAMPLE_METRICS_FILE_NAME);
        delim.write_tsv(&output_path, self.per_sample.iter())?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use fgoxide::io::DelimFile;
    use tempfile::tempdir;

    use super::*;
    use crate::sample_metadata::SampleRef;

    #[test]
    fn test_lane_read_metrics_counts_verdicts() {
        let mut metrics = LaneReadMetrics::new(3, 1);
        metrics.update_with(&MatchVerdict::Unique(SampleRef(0)));
        metrics.update_with(&MatchVerdict::Unique(SampleRef(1)));
        metrics.update_with(&MatchVerdict::NoMatch);
        metrics.update_with(&MatchVerdict::Ambiguous);
        assert_eq!(metrics.total_reads, 4);
        assert_eq!(metrics.matched_reads, 2);
        assert_eq!(metrics.unmatched_reads, 1);
        assert_eq!(metrics.ambiguous_reads, 1);
        assert_eq!(metrics.dropped_reads(), 2);
    }

    #[test]
    fn test_unmatched_counter_downsizes() {
        let mut counter = UnmatchedCounter::new(3, 2);
        for _ in 0..3 {
            counter.insert(b"AAAAAA");
        }
        for _ in 0..2 {
            counter.insert(b"CCCCCC");
        }
        counter.insert(b"GGGGGG");
        assert_eq!(counter.len(), 3);

        // a fourth key triggers the downsize, keeping the two most frequent
        counter.insert(b"TTTTTT");
        assert_eq!(counter.len(), 3);
        let top: Vec<String> = counter.most_frequent(10).into_iter().map(|b| b.barcode).collect();
        assert_eq!(top, vec!["AAAAAA", "CCCCCC", "TTTTTT"]);
    }

    #[test]
    fn test_unmatched_counter_to_file() {
        let dir = tempdir().unwrap();
        let mut counter = UnmatchedCounter::default();
        for barcode in [&b"TTTTTT"[..], b"GGGGGG", b"TTTTTT", b"ACGTAC", b"TTTTTT", b"GGGGGG"] {
            counter.insert(barcode);
        }
        counter.to_file(dir.path(), 2, "L003_").unwrap();

        let delim = DelimFile::default();
        let counts: Vec<BarcodeCount> =
            delim.read_tsv(&dir.path().join("L003_most_frequent_unmatched.tsv")).unwrap();
        assert_eq!(
            counts,
            vec![
                BarcodeCount { barcode: String::from("TTTTTT"), count: 3 },
                BarcodeCount { barcode: String::from("GGGGGG"), count: 2 },
            ]
        );
    }

    #[test]
    fn test_write_metrics_files() {
        let dir = tempdir().unwrap();
        let mut lane_read = LaneReadMetrics::new(3, 1);
        lane_read.input_files = 1;
        lane_read.update_with(&MatchVerdict::Unique(SampleRef(0)));
        lane_read.update_with(&MatchVerdict::NoMatch);

        let sample = SampleMetadata::new(String::from("S1"), 3, "CGATGT", 0);
        let path = dir.path().join("S1.fastq");
        let metrics = ReDemuxMetrics {
            per_read: vec![lane_read.clone()],
            per_sample: vec![SampleReadMetrics::new(&sample, 3, 1, 1, &path)],
            skipped_lanes: vec![],
        };
        metrics.write_metrics_files(dir.path()).unwrap();

        let delim = DelimFile::default();
        let per_read: Vec<LaneReadMetrics> =
            delim.read_tsv(&dir.path().join(METRICS_FILE_NAME)).unwrap();
        assert_eq!(per_read, vec![lane_read]);

        let per_sample: Vec<SampleReadMetrics> =
            delim.read_tsv(&dir.path().join(PER_SAMPLE_METRICS_FILE_NAME)).unwrap();
        assert_eq!(per_sample.len(), 1);
        assert_eq!(per_sample[0].sample_name, "S1");
        assert_eq!(per_sample[0].project, "Undefined");
        assert_eq!(per_sample[0].index, "CGATGT");
        assert_eq!(per_sample[0].reads, 1);
    }

    #[test]
    fn test_run_metrics_totals() {
        let mut first = LaneReadMetrics::new(1, 1);
        first.update_with(&MatchVerdict::Unique(SampleRef(0)));
        first.update_with(&MatchVerdict::Ambiguous);
        let mut second = LaneReadMetrics::new(2, 1);
        second.update_with(&MatchVerdict::NoMatch);

        let mut metrics = ReDemuxMetrics { per_read: vec![first], ..ReDemuxMetrics::default() };
        metrics.update_with(ReDemuxMetrics {
            per_read: vec![second],
            skipped_lanes: vec![4],
            ..ReDemuxMetrics::default()
        });
        assert_eq!(metrics.total_reads(), 3);
        assert_eq!(metrics.matched_reads(), 1);
        assert_eq!(metrics.dropped_reads(), 2);
        assert_eq!(metrics.skipped_lanes, vec![4]);
    }
}
