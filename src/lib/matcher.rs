//! Assignment of observed barcodes to samples, given the [`IndexCatalog`] of a lane.
//!
//! Two strategies return the same verdicts:
//! - [`ScanMatcher`] checks every index of the catalog for each barcode;
//! - [`PreComputeMatcher`] expands every index into the concrete barcodes it accepts and looks
//!   the barcode up in a hash map.

use ahash::AHashMap;
use anyhow::anyhow;
use clap::{ArgEnum, PossibleValue};
use itertools::Itertools;
use log::debug;

use crate::{
    index_catalog::{IndexCatalog, WILDCARD},
    sample_metadata::SampleRef,
};

/// The bases a wildcard position is expanded over by the [`PreComputeMatcher`].
const EXPANSION_BASES: &[u8] = &[b'A', b'C', b'G', b'T', b'N'];

/// The maximum number of expanded barcodes for which the [`PreComputeMatcher`] is chosen
/// automatically.
pub const MAX_PRECOMPUTED_BARCODES: usize = 1_000_000;

/// The outcome of matching one observed barcode.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum MatchVerdict {
    /// Exactly one sample matched.
    Unique(SampleRef),
    /// No index matched.
    NoMatch,
    /// Indexes of two or more distinct samples matched.
    Ambiguous,
}

impl MatchVerdict {
    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Unique(_))
    }

    /// Folds one more matching sample into the verdict.
    #[inline]
    fn and(self, sample: SampleRef) -> Self {
        match self {
            Self::NoMatch => Self::Unique(sample),
            Self::Unique(s) if s == sample => self,
            Self::Unique(_) | Self::Ambiguous => Self::Ambiguous,
        }
    }
}

#[derive(ArgEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Scan,
    PreCompute,
}

impl MatcherKind {
    pub fn possible_values<'a>() -> impl Iterator<Item = PossibleValue<'a>> {
        MatcherKind::value_variants().iter().filter_map(ArgEnum::to_possible_value)
    }

    /// Picks the matcher for the catalog, unless overridden.
    ///
    /// Uses the [`PreComputeMatcher`] when the catalog expands to at most
    /// [`MAX_PRECOMPUTED_BARCODES`] barcodes.
    pub fn choose(catalog: &IndexCatalog, override_matcher: Option<MatcherKind>) -> MatcherKind {
        override_matcher.unwrap_or_else(|| {
            if PreComputeMatcher::expansion_size(catalog) <= MAX_PRECOMPUTED_BARCODES {
                MatcherKind::PreCompute
            } else {
                MatcherKind::Scan
            }
        })
    }

    /// Builds the matcher of this kind for the catalog.
    pub fn build<'a>(&self, catalog: &'a IndexCatalog) -> Box<dyn Matcher + Send + Sync + 'a> {
        match self {
            MatcherKind::Scan => Box::new(ScanMatcher::new(catalog)),
            MatcherKind::PreCompute => Box::new(PreComputeMatcher::new(catalog)),
        }
    }
}

impl std::str::FromStr for MatcherKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for variant in Self::value_variants() {
            if variant.to_possible_value().map_or(false, |v| v.matches(s, false)) {
                return Ok(*variant);
            }
        }
        Err(anyhow!("Invalid variant: {}", s))
    }
}

/// The base trait for all matching algorithms.
///
/// The barcode must have the index length of the catalog.
pub trait Matcher {
    fn find(&self, barcode: &[u8]) -> MatchVerdict;
}

/// Matches by checking every index of the catalog.
pub struct ScanMatcher<'a> {
    catalog: &'a IndexCatalog,
}

impl<'a> ScanMatcher<'a> {
    pub fn new(catalog: &'a IndexCatalog) -> Self {
        Self { catalog }
    }
}

impl<'a> Matcher for ScanMatcher<'a> {
    fn find(&self, barcode: &[u8]) -> MatchVerdict {
        let mut verdict = MatchVerdict::NoMatch;
        for spec in self.catalog.specs() {
            if spec.matches(barcode) {
                verdict = verdict.and(spec.sample);
                if verdict == MatchVerdict::Ambiguous {
                    break;
                }
            }
        }
        verdict
    }
}

/// Matches with a lookup table of every barcode over `ACGTN` accepted by the catalog.
pub struct PreComputeMatcher<'a> {
    scan: ScanMatcher<'a>,
    lookup: AHashMap<Vec<u8>, MatchVerdict>,
}

impl<'a> PreComputeMatcher<'a> {
    pub fn new(catalog: &'a IndexCatalog) -> Self {
        let lookup = Self::build_map(catalog);
        debug!("Pre-computed {} barcodes for lane {}", lookup.len(), catalog.lane());
        Self { scan: ScanMatcher::new(catalog), lookup }
    }

    /// The number of barcodes the catalog expands to (saturating).
    pub fn expansion_size(catalog: &IndexCatalog) -> usize {
        catalog
            .specs()
            .iter()
            .map(|spec| {
                let wildcards = spec.text.iter().filter(|b| **b == WILDCARD).count();
                EXPANSION_BASES.len().saturating_pow(u32::try_from(wildcards).unwrap_or(u32::MAX))
            })
            .fold(0usize, usize::saturating_add)
    }

    /// Build a map from every barcode accepted by an index of the catalog to its verdict.
    pub fn build_map(catalog: &IndexCatalog) -> AHashMap<Vec<u8>, MatchVerdict> {
        let mut map: AHashMap<Vec<u8>, MatchVerdict> = AHashMap::new();
        for spec in catalog.specs() {
            let expanded = spec
                .text
                .iter()
                .map(|b| if *b == WILDCARD { EXPANSION_BASES.to_vec() } else { vec![*b] })
                .multi_cartesian_product();
            for barcode in expanded {
                let verdict = map.entry(barcode).or_insert(MatchVerdict::NoMatch);
                *verdict = verdict.and(spec.sample);
            }
        }
        map
    }
}

impl<'a> Matcher for PreComputeMatcher<'a> {
    fn find(&self, barcode: &[u8]) -> MatchVerdict {
        match self.lookup.get(barcode) {
            Some(verdict) => *verdict,
            // Only barcodes with bases outside the expansion alphabet can still match
            None if barcode.iter().all(|b| EXPANSION_BASES.contains(b)) => MatchVerdict::NoMatch,
            None => self.scan.find(barcode),
        }
    }
}

/// Hamming distance on slice of bytes.
///
/// Skips length check and will stop comparing after alpha is exhausted.  `N` is compared like
/// any other base.
#[inline]
pub fn hamming_distance(alpha: &[u8], beta: &[u8]) -> usize {
    alpha.iter().zip(beta.iter()).filter(|(a, b)| a != b).count()
}
