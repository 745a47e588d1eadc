//! A library of functionality for re-demultiplexing the undetermined reads of an Illumina run.
//!
//! # Overview
//!
//! The flow of data is as follows:
//!
//! - The [`sample_sheet::SampleSheet`] reads the samples of the run, each a
//!   [`sample_metadata::SampleMetadata`].
//! - Each revised index is resolved to one sample of its lane and added to the
//!   [`index_catalog::IndexCatalog`] of that lane by the [`redemux::ReDemux`].
//! - The [`locator::RunDirLocator`] finds the undetermined FASTQs of every lane with indexes.
//! - Lane by lane, every read's barcode is looked up with a [`matcher::Matcher`] built from the
//!   catalog, and reads with a unique match are written by the
//!   [`sample_writer::SampleOutputRegistry`] to the output of their sample.
//! - [`metrics`] are collected per lane and read number and written once all lanes are done.
#![deny(unsafe_code)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]
pub mod index_catalog;
pub mod locator;
pub mod matcher;
pub mod metrics;
pub mod opts;
pub mod redemux;
pub mod run;
pub mod sample_metadata;
pub mod sample_sheet;
pub mod sample_writer;
pub mod utils;
