#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate)]

use std::{collections::HashSet, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::sample_sheet::SampleSheetError;

/// The project name used in output paths for samples without a project.
pub const DEFAULT_PROJECT_NAME: &str = "Undefined";

/// The index name used in output paths for samples without an index.
pub const NO_INDEX_NAME: &str = "NoIndex";

/// An opaque handle to a sample in the sample sheet.
///
/// The handle is the ordinal of the sample (its 0-based row number in the `[Data]` section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleRef(pub usize);

impl Display for SampleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata about a sample, one per row of the sample sheet.
///
/// Both the bcl2fastq 1 (`SampleID`, `Index`, `SampleProject`) and bcl2fastq 2 (`Sample_ID`,
/// `index`, `Sample_Project`) column names are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Hash, Eq)]
pub struct SampleMetadata {
    /// The identifier for the sample.
    #[serde(alias = "Sample_ID", alias = "SampleID", rename(serialize = "Sample_ID"))]
    pub sample_id: String,

    /// The optional sample name, used to name the output files when present.
    #[serde(
        default,
        alias = "Sample_Name",
        alias = "SampleName",
        rename(serialize = "Sample_Name")
    )]
    pub sample_name: Option<String>,

    /// The lane number.
    #[serde(default, alias = "Lane", rename(serialize = "Lane"))]
    pub lane: Option<usize>,

    /// The sample index in the first index read.
    #[serde(default, alias = "Index", alias = "Index1_Sequence", rename(serialize = "index"))]
    pub index: Option<String>,

    /// The sample index in the second index read.
    #[serde(default, alias = "Index2", alias = "Index2_Sequence", rename(serialize = "index2"))]
    pub index2: Option<String>,

    /// The project associated with this the sample
    #[serde(
        default,
        alias = "Sample_Project",
        alias = "SampleProject",
        alias = "Project",
        rename(serialize = "Sample_Project")
    )]
    pub project: Option<String>,

    /// The number of the sample in the samplesheet (corresponds to the row number), starts at 0.
    #[serde(skip)]
    pub ordinal: usize,

    /// The line number in the input in which this sample was defined
    #[serde(skip)]
    pub line_number: Option<usize>,
}

impl SampleMetadata {
    /// Create a new [`SampleMetadata`] with just an id, lane, and index.
    pub fn new(sample_id: String, lane: usize, index: &str, ordinal: usize) -> Self {
        Self {
            sample_id,
            sample_name: None,
            lane: Some(lane),
            index: Some(index.to_string()),
            index2: None,
            project: None,
            ordinal,
            line_number: None,
        }
        .normalize(ordinal, None)
    }

    /// Sets the ordinal and line number, and cleans up the free-text fields.
    ///
    /// Empty optional values become `None` and index sequences are trimmed and upper-cased.
    pub fn normalize(mut self, ordinal: usize, line_number: Option<usize>) -> Self {
        fn non_empty(value: Option<String>) -> Option<String> {
            value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }
        self.ordinal = ordinal;
        self.line_number = line_number;
        self.sample_id = self.sample_id.trim().to_string();
        self.sample_name = non_empty(self.sample_name);
        self.project = non_empty(self.project);
        self.index = non_empty(self.index).map(|i| i.to_ascii_uppercase());
        self.index2 = non_empty(self.index2).map(|i| i.to_ascii_uppercase());
        self
    }

    /// The handle for this sample.
    pub fn sample_ref(&self) -> SampleRef {
        SampleRef(self.ordinal)
    }

    /// The name the demultiplexer used for this sample: the sample name if given, otherwise the
    /// sample id.
    pub fn demultiplexing_name(&self) -> &str {
        self.sample_name.as_deref().unwrap_or(&self.sample_id)
    }

    /// The project name used in output paths.
    pub fn project_name(&self) -> &str {
        self.project.as_deref().unwrap_or(DEFAULT_PROJECT_NAME)
    }

    /// The index used in output file names.
    pub fn index_name(&self) -> &str {
        self.index.as_deref().unwrap_or(NO_INDEX_NAME)
    }

    /// The reference index bases (index1), empty if the sample has no index.
    pub fn reference_index(&self) -> &[u8] {
        self.index.as_deref().map(str::as_bytes).unwrap_or_default()
    }
}

/// Validates a set of samples ([`SampleMetadata`] objects).
///
/// # Errors
///
/// - [`SampleSheetError::NoSamples`]
/// - [`SampleSheetError::DuplicateSampleInLane`] if a `Sample_ID` occurs twice in the same lane
pub fn validate_samples(
    samples: Vec<SampleMetadata>,
) -> Result<Vec<SampleMetadata>, SampleSheetError> {
    if samples.is_empty() {
        return Err(SampleSheetError::NoSamples);
    }

    let mut ids = HashSet::new();
    for sample in &samples {
        if !ids.insert((sample.lane, sample.sample_id.as_str())) {
            return Err(SampleSheetError::DuplicateSampleInLane {
                id: sample.sample_id.clone(),
                lane: sample.lane.map_or_else(|| String::from("none"), |l| l.to_string()),
            });
        }
    }

    Ok(samples)
}
