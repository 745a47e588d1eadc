//! Discovery of the undetermined FASTQs of a run.
//!
//! bcl2fastq 1 writes the reads without a known index of lane `N` to
//! `<run>/Undetermined_indices/Sample_lane<N>/lane<N>_Undetermined_L00<N>_R<read>_<chunk>.fastq[.gz]`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use itertools::Itertools;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::redemux::ReDemuxError;

/// The default largest read number.
pub const DEFAULT_MAX_READ_NUMBER: usize = 2;

/// The directory of the run holding the per-lane undetermined directories.
pub const UNDETERMINED_DIR_NAME: &str = "Undetermined_indices";

lazy_static! {
    /// lane<N>_Undetermined_L00<N>_R<read>_<*>
    static ref UNDETERMINED_FASTQ_REGEX: Regex =
        Regex::new(r"^lane(\d+)_Undetermined_L00(\d+)_R(\d+)_").unwrap();
}

/// Finds the input FASTQs of a lane.
pub trait UndeterminedFileLocator {
    /// The read numbers with undetermined FASTQs for the lane, sorted and without duplicates.
    ///
    /// Returns `None` when the lane has no undetermined reads directory at all.
    fn read_numbers(&self, lane: usize) -> Result<Option<Vec<usize>>>;

    /// The undetermined FASTQs for the lane and read number, sorted by name.
    fn files(&self, lane: usize, read_number: usize) -> Result<Vec<PathBuf>>;
}

/// Locates the undetermined FASTQs in the directory layout written by bcl2fastq 1.
#[derive(Debug, Clone)]
pub struct RunDirLocator {
    run_dir: PathBuf,
    max_read_number: usize,
}

impl RunDirLocator {
    pub fn new<P: AsRef<Path>>(run_dir: P, max_read_number: usize) -> Self {
        Self { run_dir: run_dir.as_ref().to_path_buf(), max_read_number }
    }

    /// The directory with the undetermined FASTQs of the lane.
    pub fn lane_dir(&self, lane: usize) -> PathBuf {
        self.run_dir.join(UNDETERMINED_DIR_NAME).join(format!("Sample_lane{}", lane))
    }

    /// The undetermined FASTQs of the lane with their read number, sorted by name.
    fn undetermined_fastqs(&self, lane: usize) -> Result<Vec<(usize, PathBuf)>> {
        let dir = self.lane_dir(lane);
        let mut fastqs = vec![];
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list directory {}", dir.display()))?
        {
            let path = entry.with_context(|| format!("Failed to list {}", dir.display()))?.path();
            if !path.is_file() {
                continue;
            }
            if let Some(read_number) = Self::read_number(&path, lane) {
                fastqs.push((read_number, path));
            }
        }
        fastqs.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(fastqs)
    }

    /// The read number of an undetermined FASTQ of the lane, from its file name.
    fn read_number(path: &Path, lane: usize) -> Option<usize> {
        let file_name = path.file_name()?.to_str()?;
        let captures = UNDETERMINED_FASTQ_REGEX.captures(file_name)?;
        let lane_number = captures.get(1)?.as_str().parse::<usize>().ok()?;
        let file_lane = captures.get(2)?.as_str().parse::<usize>().ok()?;
        if lane_number != lane || file_lane != lane {
            return None;
        }
        captures.get(3)?.as_str().parse::<usize>().ok()
    }
}

impl UndeterminedFileLocator for RunDirLocator {
    fn read_numbers(&self, lane: usize) -> Result<Option<Vec<usize>>> {
        if !self.lane_dir(lane).is_dir() {
            return Ok(None);
        }

        let fastqs = self.undetermined_fastqs(lane)?;
        if fastqs.is_empty() {
            return Err(ReDemuxError::NoUndeterminedFilesFound {
                lane,
                dir: self.lane_dir(lane).display().to_string(),
            }
            .into());
        }
        if let Some((read_number, path)) =
            fastqs.iter().find(|(r, _)| *r < 1 || *r > self.max_read_number)
        {
            return Err(ReDemuxError::InvalidReadNumber {
                lane,
                read_number: *read_number,
                max_read_number: self.max_read_number,
                file: path.display().to_string(),
            }
            .into());
        }

        let read_numbers: Vec<usize> = fastqs.iter().map(|(r, _)| *r).sorted().dedup().collect();
        debug!("Found reads {:?} for lane {}", read_numbers, lane);
        Ok(Some(read_numbers))
    }

    fn files(&self, lane: usize, read_number: usize) -> Result<Vec<PathBuf>> {
        let files: Vec<PathBuf> = self
            .undetermined_fastqs(lane)?
            .into_iter()
            .filter(|(r, _)| *r == read_number)
            .map(|(_, path)| path)
            .collect();
        if files.is_empty() {
            return Err(ReDemuxError::NoUndeterminedFilesFound {
                lane,
                dir: self.lane_dir(lane).display().to_string(),
            }
            .into());
        }
        Ok(files)
    }
}

#[cfg(test)]
mod test {
    use matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::File::create(dir.join(name)).unwrap();
    }

    fn error_of(result: Result<impl std::fmt::Debug>) -> ReDemuxError {
        result.unwrap_err().downcast::<ReDemuxError>().unwrap()
    }

    #[test]
    fn test_missing_lane_dir() {
        let dir = tempdir().unwrap();
        let locator = RunDirLocator::new(dir.path(), DEFAULT_MAX_READ_NUMBER);
        assert_eq!(locator.read_numbers(3).unwrap(), None);
    }

    #[test]
    fn test_read_numbers_and_files() {
        let dir = tempdir().unwrap();
        let locator = RunDirLocator::new(dir.path(), DEFAULT_MAX_READ_NUMBER);
        let lane_dir = locator.lane_dir(3);
        touch(&lane_dir, "lane3_Undetermined_L003_R2_001.fastq.gz");
        touch(&lane_dir, "lane3_Undetermined_L003_R1_002.fastq.gz");
        touch(&lane_dir, "lane3_Undetermined_L003_R1_001.fastq.gz");
        touch(&lane_dir, "lane3_Undetermined_L003_R2_002.fastq.gz");
        touch(&lane_dir, "SampleSheet.csv");
        touch(&lane_dir, "lane4_Undetermined_L004_R1_001.fastq.gz");

        assert_eq!(locator.read_numbers(3).unwrap(), Some(vec![1, 2]));
        assert_eq!(
            locator.files(3, 1).unwrap(),
            vec![
                lane_dir.join("lane3_Undetermined_L003_R1_001.fastq.gz"),
                lane_dir.join("lane3_Undetermined_L003_R1_002.fastq.gz"),
            ]
        );
        assert_eq!(
            locator.files(3, 2).unwrap(),
            vec![
                lane_dir.join("lane3_Undetermined_L003_R2_001.fastq.gz"),
                lane_dir.join("lane3_Undetermined_L003_R2_002.fastq.gz"),
            ]
        );
    }

    #[test]
    fn test_lane_dir_without_undetermined_files() {
        let dir = tempdir().unwrap();
        let locator = RunDirLocator::new(dir.path(), DEFAULT_MAX_READ_NUMBER);
        touch(&locator.lane_dir(3), "notes.txt");
        assert_matches!(
            error_of(locator.read_numbers(3)),
            ReDemuxError::NoUndeterminedFilesFound { lane: 3, .. }
        );
        assert_matches!(
            error_of(locator.files(3, 1)),
            ReDemuxError::NoUndeterminedFilesFound { lane: 3, .. }
        );
    }

    #[test]
    fn test_invalid_read_number() {
        let dir = tempdir().unwrap();
        let locator = RunDirLocator::new(dir.path(), DEFAULT_MAX_READ_NUMBER);
        touch(&locator.lane_dir(1), "lane1_Undetermined_L001_R1_001.fastq");
        touch(&locator.lane_dir(1), "lane1_Undetermined_L001_R3_001.fastq");
        assert_matches!(
            error_of(locator.read_numbers(1)),
            ReDemuxError::InvalidReadNumber { lane: 1, read_number: 3, max_read_number: 2, .. }
        );

        let locator = RunDirLocator::new(dir.path(), 3);
        assert_eq!(locator.read_numbers(1).unwrap(), Some(vec![1, 3]));

        touch(&locator.lane_dir(2), "lane2_Undetermined_L002_R0_001.fastq");
        assert_matches!(
            error_of(locator.read_numbers(2)),
            ReDemuxError::InvalidReadNumber { read_number: 0, .. }
        );
    }
}
