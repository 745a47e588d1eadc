//! The per-lane catalog of revised sample indexes.
//!
//! Each index given by the operator for a lane is validated and resolved, once, to exactly one
//! sample of that lane in the sample sheet:
//!
//! - an exact index (only `A`, `C`, `G`, `T`, `N`) goes to the sample whose reference index is
//!   the closest by hamming distance, provided it is within the allowed number of mismatches and
//!   no other sample is as close;
//! - a wildcard index (containing at least one `.`) goes to the single sample whose reference
//!   index matches the pattern.
//!
//! The catalog is immutable once streaming starts; see [`crate::matcher`] for how it is used to
//! assign reads.

use bstr::{BString, ByteSlice};
use itertools::Itertools;
use thiserror::Error;

use crate::{
    matcher::hamming_distance,
    sample_metadata::SampleRef,
    sample_sheet::SampleLookup,
};

/// The default length of the sample indexes.
pub const DEFAULT_INDEX_LENGTH: usize = 6;

/// The default number of mismatches allowed between an exact index and the reference index of
/// the sample it resolves to.
pub const DEFAULT_MAX_MISMATCHES: usize = 2;

/// The wildcard character in an index pattern.
pub const WILDCARD: u8 = b'.';

/// The characters that are allowed in an index given by the operator.
const ALLOWED_INDEX_CHARS: &[u8] = &[b'A', b'C', b'G', b'T', b'N', WILDCARD];

/// The errors that may occur when adding an index to an [`IndexCatalog`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("Invalid index on lane {lane}, the length of the index must be {expected}: {index}")]
    InvalidIndexLength { lane: usize, index: String, expected: usize },

    #[error("Invalid character `{character}` in index on lane {lane}, only 'A', 'C', 'G', 'T', 'N' and '.' are allowed: {index}")]
    InvalidIndexCharacter { lane: usize, index: String, character: char },

    #[error("No sample matches with index on lane {lane}: {index}")]
    NoSampleMatchesWildcardIndex { lane: usize, index: String },

    #[error("More than one sample ({samples}) matches with index on lane {lane}: {index}")]
    AmbiguousWildcardIndex { lane: usize, index: String, samples: String },

    #[error("Cannot allow more than {max_mismatches} mismatches on lane {lane}, the closest sample index is {best_distance} mismatches away: {index}")]
    TooManyMismatches { lane: usize, index: String, best_distance: usize, max_mismatches: usize },

    #[error("More than one sample ({samples}) matches with index on lane {lane} with {distance} mismatches: {index}")]
    AmbiguousExactIndex { lane: usize, index: String, distance: usize, samples: String },

    #[error("No sample found in the sample sheet for lane {lane}, cannot resolve index: {index}")]
    NoSampleInLane { lane: usize, index: String },

    #[error("The index `{sample_index}` of sample {sample_id} on lane {lane} has not the expected length of {expected}")]
    SampleIndexLengthMismatch { lane: usize, sample_id: String, sample_index: String, expected: usize },
}

/// Whether an [`IndexSpec`] is an exact sequence or a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Exact,
    Wildcard,
}

/// One revised index for one lane, bound to the sample it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    /// The lane of the index.
    pub lane: usize,
    /// Exact sequence or wildcard pattern.
    pub kind: IndexKind,
    /// The upper-cased index text.
    pub text: BString,
    /// The sample reads matching this index are assigned to.
    pub sample: SampleRef,
}

impl IndexSpec {
    /// True if the observed barcode is matched by this index.
    ///
    /// An exact index matches only an identical barcode (a hamming distance of zero), a wildcard
    /// index matches when every non-wildcard position is identical.
    #[inline]
    pub fn matches(&self, barcode: &[u8]) -> bool {
        match self.kind {
            IndexKind::Exact => self.text.as_bytes() == barcode,
            IndexKind::Wildcard => matches_pattern(&self.text, barcode),
        }
    }
}

/// True if `pattern` matches the whole of `barcode`, `.` matching any character.
#[inline]
pub fn matches_pattern(pattern: &[u8], barcode: &[u8]) -> bool {
    pattern.len() == barcode.len()
        && pattern.iter().zip(barcode.iter()).all(|(p, b)| *p == WILDCARD || p == b)
}

/// Upper-cases and validates an index given by the operator, returning its kind and text.
///
/// # Errors
///
/// - [`IndexError::InvalidIndexLength`] if the trimmed index is not `index_length` long
/// - [`IndexError::InvalidIndexCharacter`] if the index has characters other than `ACGTN.`
pub fn parse_index(
    lane: usize,
    raw: &str,
    index_length: usize,
) -> Result<(IndexKind, BString), IndexError> {
    let upper = raw.trim().to_ascii_uppercase();

    if let Some(c) =
        upper.chars().find(|c| !c.is_ascii() || !ALLOWED_INDEX_CHARS.contains(&(*c as u8)))
    {
        return Err(IndexError::InvalidIndexCharacter {
            lane,
            index: raw.to_string(),
            character: c,
        });
    }
    // only ASCII remains, so bytes are characters
    if upper.len() != index_length {
        return Err(IndexError::InvalidIndexLength {
            lane,
            index: raw.to_string(),
            expected: index_length,
        });
    }
    let text = BString::from(upper);

    let kind = if text.contains(&WILDCARD) { IndexKind::Wildcard } else { IndexKind::Exact };
    Ok((kind, text))
}

/// The revised indexes of one lane.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    lane: usize,
    index_length: usize,
    max_mismatches: usize,
    specs: Vec<IndexSpec>,
}

impl IndexCatalog {
    /// Create an empty catalog for the given lane.
    pub fn new(lane: usize, index_length: usize, max_mismatches: usize) -> Self {
        Self { lane, index_length, max_mismatches, specs: vec![] }
    }

    /// The lane of this catalog.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The length all indexes and observed barcodes must have.
    pub fn index_length(&self) -> usize {
        self.index_length
    }

    /// The indexes in the order they were added.
    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The distinct samples targeted by the indexes, in the order first added.
    pub fn samples(&self) -> Vec<SampleRef> {
        self.specs.iter().map(|s| s.sample).unique().collect()
    }

    /// Validate an index, resolve it to a sample of this lane, and add it to the catalog.
    ///
    /// Adding an index already present is a no-op.  Returns the sample the
    /// index resolved to.
    ///
    /// # Errors
    ///
    /// See [`parse_index`], and:
    /// - [`IndexError::NoSampleMatchesWildcardIndex`] / [`IndexError::AmbiguousWildcardIndex`]
    ///   when a wildcard index matches zero or more than one sample
    /// - [`IndexError::NoSampleInLane`] if the lane has no samples
    /// - [`IndexError::SampleIndexLengthMismatch`] if a sample of the lane has an index of the wrong length
    /// - [`IndexError::TooManyMismatches`] / [`IndexError::AmbiguousExactIndex`] when an exact
    ///   index is too far from every sample, or equally close to more than one
    pub fn add_index<S: SampleLookup + ?Sized>(
        &mut self,
        raw: &str,
        lookup: &S,
    ) -> Result<SampleRef, IndexError> {
        let (kind, text) = parse_index(self.lane, raw, self.index_length)?;

        let sample = match kind {
            IndexKind::Wildcard => self.resolve_wildcard(&text, lookup)?,
            IndexKind::Exact => self.resolve_exact(&text, lookup)?,
        };

        // resolution depends only on the text, so a repeated index maps to the same sample
        if self.specs.iter().any(|s| s.text == text) {
            return Ok(sample);
        }

        self.specs.push(IndexSpec { lane: self.lane, kind, text, sample });
        Ok(sample)
    }

    /// Finds the single sample of the lane whose reference index matches the pattern.
    fn resolve_wildcard<S: SampleLookup + ?Sized>(
        &self,
        pattern: &BString,
        lookup: &S,
    ) -> Result<SampleRef, IndexError> {
        let matching: Vec<SampleRef> = lookup
            .samples_in_lane(self.lane)
            .into_iter()
            .filter(|s| matches_pattern(pattern, lookup.sample(*s).reference_index()))
            .collect();

        match matching.len() {
            0 => Err(IndexError::NoSampleMatchesWildcardIndex {
                lane: self.lane,
                index: pattern.to_string(),
            }),
            1 => Ok(matching[0]),
            _ => Err(IndexError::AmbiguousWildcardIndex {
                lane: self.lane,
                index: pattern.to_string(),
                samples: sample_ids(&matching, lookup),
            }),
        }
    }

    /// Finds the sample of the lane whose reference index is the closest to the index.
    fn resolve_exact<S: SampleLookup + ?Sized>(
        &self,
        index: &BString,
        lookup: &S,
    ) -> Result<SampleRef, IndexError> {
        let candidates = lookup.samples_in_lane(self.lane);
        if candidates.is_empty() {
            return Err(IndexError::NoSampleInLane { lane: self.lane, index: index.to_string() });
        }

        let mut best_distance = usize::MAX;
        let mut best: Vec<SampleRef> = vec![];
        for candidate in candidates {
            let sample = lookup.sample(candidate);
            let reference = sample.reference_index();
            if reference.len() != index.len() {
                return Err(IndexError::SampleIndexLengthMismatch {
                    lane: self.lane,
                    sample_id: sample.sample_id.clone(),
                    sample_index: sample.index_name().to_string(),
                    expected: index.len(),
                });
            }

            let distance = hamming_distance(index, reference);
            if distance < best_distance {
                best_distance = distance;
                best.clear();
                best.push(candidate);
            } else if distance == best_distance {
                best.push(candidate);
            }
        }

        if best_distance > self.max_mismatches {
            Err(IndexError::TooManyMismatches {
                lane: self.lane,
                index: index.to_string(),
                best_distance,
                max_mismatches: self.max_mismatches,
            })
        } else if best.len() > 1 {
            Err(IndexError::AmbiguousExactIndex {
                lane: self.lane,
                index: index.to_string(),
                distance: best_distance,
                samples: sample_ids(&best, lookup),
            })
        } else {
            Ok(best[0])
        }
    }
}

/// Comma separated sample ids, for error messages.
fn sample_ids<S: SampleLookup + ?Sized>(samples: &[SampleRef], lookup: &S) -> String {
    samples.iter().map(|s| lookup.sample(*s).sample_id.as_str()).join(", ")
}
