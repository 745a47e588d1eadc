//! Reading of the sample sheet that backs every [`SampleRef`].
//!
//! Only the sample rows are consumed: the `[Data]` section of a bcl2fastq 2 sample sheet, or the
//! whole file when it is a plain CSV with a header line (bcl2fastq 1 style).

use std::{fmt::Display, path::Path};

use csv::{ReaderBuilder, StringRecord, Trim};
use fgoxide::io::Io;
use itertools::Itertools;
use thiserror::Error;

use crate::sample_metadata::{validate_samples, SampleMetadata, SampleRef};

/// The optional line number from the sample sheet where an error ocurred.
#[derive(Debug)]
pub struct ErrorLine(pub Option<usize>);

impl Display for ErrorLine {
    /// Writes the line number if present, nothing if it is not None.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(number) => write!(f, "Line {}", number),
            None => Ok(()),
        }
    }
}

/// The error that may occur when parsing the [`SampleSheet`].
#[derive(Error, Debug)]
pub enum SampleSheetError {
    #[error("Io error occurred")]
    Io(#[from] std::io::Error),

    #[error("Io error occurred")]
    FgError(#[from] fgoxide::FgError),

    #[error("The sample sheet was empty")]
    Empty,

    #[error("The '[Data]' section is missing samples")]
    NoSamples,

    #[error("The header line in the '[Data]' section is missing")]
    NoDataHeader,

    #[error("The sample on line {line_number} had {actual} fields, expected {expected} fields, for line: {line}")]
    SampleInvalidNumberOfColumns { actual: usize, expected: usize, line_number: usize, line: String },

    #[error("Unable to parse the sample info line number {line}: {source}")]
    SampleInvalidLine { source: csv::Error, line: usize },

    #[error("Missing Sample_ID. {line}")]
    MissingSampleId { line: ErrorLine },

    #[error("Duplicate Sample_ID {id} found in lane {lane}")]
    DuplicateSampleInLane { id: String, lane: String },

    #[error(transparent)]
    Deserialize(#[from] csv::Error),
}

/// Access to the samples of a sample sheet.
///
/// This is the only view of the sample sheet the re-demultiplexing needs: the samples assigned
/// to a lane, and the metadata behind a [`SampleRef`].
pub trait SampleLookup {
    /// The metadata for the given sample.
    ///
    /// # Panics
    /// - if the handle was not produced by this lookup
    fn sample(&self, sample: SampleRef) -> &SampleMetadata;

    /// The samples assigned to the given lane, in sample sheet order.
    fn samples_in_lane(&self, lane: usize) -> Vec<SampleRef>;
}

impl SampleLookup for [SampleMetadata] {
    fn sample(&self, sample: SampleRef) -> &SampleMetadata {
        &self[sample.0]
    }

    fn samples_in_lane(&self, lane: usize) -> Vec<SampleRef> {
        self.iter().filter(|s| s.lane == Some(lane)).map(SampleMetadata::sample_ref).collect()
    }
}

impl SampleLookup for Vec<SampleMetadata> {
    fn sample(&self, sample: SampleRef) -> &SampleMetadata {
        self.as_slice().sample(sample)
    }

    fn samples_in_lane(&self, lane: usize) -> Vec<SampleRef> {
        self.as_slice().samples_in_lane(lane)
    }
}

#[derive(Debug, Clone)]
pub struct SampleSheet {
    pub samples: Vec<SampleMetadata>,
}

impl SampleLookup for SampleSheet {
    fn sample(&self, sample: SampleRef) -> &SampleMetadata {
        self.samples.sample(sample)
    }

    fn samples_in_lane(&self, lane: usize) -> Vec<SampleRef> {
        self.samples.samples_in_lane(lane)
    }
}

impl SampleSheet {
    /// Builds a `SampleSheet` from the CSV at the given path.
    ///
    /// If a line starts with `[Data]` the file is treated as a bcl2fastq 2 sample sheet and the
    /// samples are read from the `[Data]` section.  Otherwise the whole file is a CSV with a
    /// header line.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SampleSheetError> {
        // Read in all the lines so we can check if we have a simple CSV file or a full-fledged
        // Sample Sheet.
        let io = Io::default();
        let lines = io.read_lines(&path).map_err(SampleSheetError::FgError)?;

        if lines.iter().all(|l| l.trim().is_empty()) {
            return Err(SampleSheetError::Empty);
        }

        let is_sample_sheet: bool = lines.iter().any(|l| l.starts_with("[Data]"));

        let data = lines.join("\n");
        let reader = data.as_bytes();
        if is_sample_sheet {
            SampleSheet::from_sample_sheet_reader(reader)
        } else {
            SampleSheet::from_metadata_csv_reader(reader)
        }
    }

    /// Reads the samples from the `[Data]` section of a sample sheet.
    fn from_sample_sheet_reader<R: std::io::Read>(reader: R) -> Result<Self, SampleSheetError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(false)
            .quoting(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut records: Vec<StringRecord> = vec![];
        for record in reader.records() {
            let rec = record?;
            records.push(rec);
        }

        let (start, end) = match SampleSheet::find_section(&records, "[Data]") {
            None => return Err(SampleSheetError::NoDataHeader),
            Some(tuple) => tuple,
        };

        let samples = SampleSheet::slurp_samples(&records[start..=end], start)?;
        let samples = validate_samples(samples)?;
        Ok(SampleSheet { samples })
    }

    /// Reads the samples from a plain CSV with a header line.
    fn from_metadata_csv_reader<R: std::io::Read>(reader: R) -> Result<Self, SampleSheetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(b',')
            .trim(Trim::All)
            .from_reader(reader);

        let mut samples = vec![];
        for (ordinal, record) in reader.deserialize().enumerate() {
            // Note that line numbers a +2 to account for the header and convert to 1-based counting
            let record: SampleMetadata = record
                .map_err(|e| SampleSheetError::SampleInvalidLine { source: e, line: ordinal + 2 })?;
            samples.push(Self::to_sample(record, ordinal, ordinal + 2)?);
        }

        let samples = validate_samples(samples)?;
        Ok(SampleSheet { samples })
    }

    /// Normalizes a deserialized row, checking it has a sample id.
    fn to_sample(
        record: SampleMetadata,
        ordinal: usize,
        line_number: usize,
    ) -> Result<SampleMetadata, SampleSheetError> {
        let sample = record.normalize(ordinal, Some(line_number));
        if sample.sample_id.is_empty() {
            return Err(SampleSheetError::MissingSampleId { line: ErrorLine(Some(line_number)) });
        }
        Ok(sample)
    }

    /// Finds the start and end line index (0-based inclusive) of the section with the given key
    /// (e.g.  "[Header]", "[Data]"), returning `None` if the key wasn't found or the section is
    /// empty.  The key must occur in the first column.  The end of the section is identified by
    /// the first column starting with "[".  The line with the section key is not returned.
    fn find_section(records: &[StringRecord], section_key: &str) -> Option<(usize, usize)> {
        let start = records.iter().position(|r| r.get(0) == Some(section_key))? + 1;
        let end = records[start..]
            .iter()
            .position(|r| r.get(0).map_or(false, |f| f.starts_with('[')))
            .map_or(records.len(), |offset| start + offset);
        if start >= end {
            None
        } else {
            Some((start, end - 1))
        }
    }

    /// Converts the given string records from a sample sheet to samples.  Assumes a header, and
    /// all rows have the same number of columns.
    fn slurp_samples(
        records: &[StringRecord],
        mut line_index: usize,
    ) -> Result<Vec<SampleMetadata>, SampleSheetError> {
        if records.is_empty() {
            return Err(SampleSheetError::NoDataHeader);
        }

        // The header line with column names
        let header = &records[0];
        line_index += 1;

        let mut samples: Vec<SampleMetadata> = vec![];
        for record in &records[1..] {
            line_index += 1;
            // allow an empty line
            if record.iter().all(str::is_empty) {
                continue;
            }
            // make sure we have the correct number of columns
            if header.len() != record.len() {
                return Err(SampleSheetError::SampleInvalidNumberOfColumns {
                    actual: record.len(),
                    expected: header.len(),
                    line_number: line_index,
                    line: record.into_iter().join(","),
                });
            }

            let sample: SampleMetadata = record
                .deserialize(Some(header))
                .map_err(|e| SampleSheetError::SampleInvalidLine { source: e, line: line_index })?;
            samples.push(Self::to_sample(sample, samples.len(), line_index)?);
        }
        if samples.is_empty() {
            return Err(SampleSheetError::NoSamples);
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod test {
    use std::path::{Path, PathBuf};

    use matches::assert_matches;
    use tempfile::tempdir;

    use super::{SampleLookup, SampleSheet, SampleSheetError};
    use crate::sample_metadata::SampleRef;

    fn write_sheet(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("SampleSheet.csv");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_bcl2fastq2_sample_sheet() {
        let dir = tempdir().unwrap();
        let path = write_sheet(
            dir.path(),
            "[Header]\n\
             IEMFileVersion,4\n\
             Date,2016-01-01\n\
             \n\
             [Reads]\n\
             101\n\
             \n\
             [Data]\n\
             Lane,Sample_ID,Sample_Name,Sample_Plate,index,Sample_Project,Description\n\
             1,2016_001,Liver,,atcacg,ProjA,\n\
             1,2016_002,,,CGATGT,ProjA,\n\
             2,2016_003,Brain,,TTAGGC,ProjB,\n",
        );

        let sheet = SampleSheet::from_path(&path).unwrap();
        assert_eq!(sheet.samples.len(), 3);

        let first = sheet.sample(SampleRef(0));
        assert_eq!(first.sample_id, "2016_001");
        assert_eq!(first.demultiplexing_name(), "Liver");
        assert_eq!(first.index.as_deref(), Some("ATCACG"));
        assert_eq!(first.project_name(), "ProjA");
        assert_eq!(first.lane, Some(1));

        let second = sheet.sample(SampleRef(1));
        assert_eq!(second.demultiplexing_name(), "2016_002");

        assert_eq!(sheet.samples_in_lane(1), vec![SampleRef(0), SampleRef(1)]);
        assert_eq!(sheet.samples_in_lane(2), vec![SampleRef(2)]);
        assert!(sheet.samples_in_lane(3).is_empty());
    }

    #[test]
    fn test_bcl2fastq1_csv() {
        let dir = tempdir().unwrap();
        let path = write_sheet(
            dir.path(),
            "FCID,Lane,SampleID,SampleRef,Index,Description,Control,Recipe,Operator,SampleProject\n\
             C1KUMACXX,3,S1,hg19,CGATGT,desc,N,R1,op,ProjA\n\
             C1KUMACXX,3,S2,hg19,TGACCA,desc,N,R1,op,ProjA\n",
        );

        let sheet = SampleSheet::from_path(&path).unwrap();
        assert_eq!(sheet.samples.len(), 2);
        assert_eq!(sheet.samples[1].sample_id, "S2");
        assert_eq!(sheet.samples[1].index.as_deref(), Some("TGACCA"));
        assert_eq!(sheet.samples[1].line_number, Some(3));
        assert_eq!(sheet.samples_in_lane(3), vec![SampleRef(0), SampleRef(1)]);
    }

    #[test]
    fn test_empty_sample_sheet() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "\n\n");
        assert_matches!(SampleSheet::from_path(&path), Err(SampleSheetError::Empty));
    }

    #[test]
    fn test_data_section_without_samples() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "[Data]\nLane,Sample_ID,index\n");
        assert_matches!(SampleSheet::from_path(&path), Err(SampleSheetError::NoSamples));
    }

    #[test]
    fn test_data_section_missing_header() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "[Header]\nDate,2016\n[Data]\n");
        assert_matches!(SampleSheet::from_path(&path), Err(SampleSheetError::NoDataHeader));
    }

    #[test]
    fn test_wrong_number_of_columns() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "[Data]\nLane,Sample_ID,index\n1,S1,ACGTAC,extra\n");
        let result = SampleSheet::from_path(&path);
        assert_matches!(result, Err(SampleSheetError::SampleInvalidNumberOfColumns { .. }));
        if let Err(SampleSheetError::SampleInvalidNumberOfColumns { line_number, .. }) = result {
            assert_eq!(line_number, 3);
        }
    }

    #[test]
    fn test_invalid_lane() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "[Data]\nLane,Sample_ID,index\nfirst,S1,ACGTAC\n");
        assert_matches!(
            SampleSheet::from_path(&path),
            Err(SampleSheetError::SampleInvalidLine { line: 3, .. })
        );
    }

    #[test]
    fn test_missing_sample_id() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), "Lane,Sample_ID,index\n1,,ACGTAC\n");
        assert_matches!(
            SampleSheet::from_path(&path),
            Err(SampleSheetError::MissingSampleId { .. })
        );
    }

    #[test]
    fn test_data_section_ends_at_next_section() {
        let dir = tempdir().unwrap();
        let path = write_sheet(
            dir.path(),
            "[Data]\nLane,Sample_ID,index\n1,S1,ACGTAC\n\n[Settings]\nAdapter,AGATCGGAAGAGC\n",
        );
        let sheet = SampleSheet::from_path(&path).unwrap();
        assert_eq!(sheet.samples.len(), 1);
    }
}
