//! The per-sample output FASTQs of one read number of one lane.
//!
//! Writers are keyed by the demultiplexing name of the sample, so that every index resolving to
//! the same sample is written to the same file.  A writer is created on the first read routed to
//! its sample and lives until [`SampleOutputRegistry::close_all`].

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use anyhow::{Context, Result};
use log::debug;

use crate::{
    sample_metadata::{SampleMetadata, SampleRef},
    sample_sheet::SampleLookup,
    utils::{Compression, CompressionSettings, FastqWriter},
};

/// The output FASTQ path of a sample, relative to the output directory.
///
/// `Project_<project>/Sample_<name>/<name>_<index>_L00<lane>_R<read>_redemux_.fastq<ext>`
pub fn output_path(
    sample: &SampleMetadata,
    lane: usize,
    read_number: usize,
    compression: Compression,
) -> PathBuf {
    let name = sample.demultiplexing_name();
    PathBuf::from(format!("Project_{}", sample.project_name()))
        .join(format!("Sample_{}", name))
        .join(format!(
            "{}_{}_L00{}_R{}_redemux_.fastq{}",
            name,
            sample.index_name(),
            lane,
            read_number,
            compression.extension()
        ))
}

/// A sample output that was written and closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedOutput {
    /// The first sample routed to the output.
    pub sample: SampleRef,
    pub path: PathBuf,
    /// The number of records written.
    pub records: usize,
}

/// An open output and the number of records written so far.
struct SampleOutput {
    sample: SampleRef,
    path: PathBuf,
    writer: FastqWriter,
    records: usize,
}

/// Maps samples to their open output FASTQ for one (lane, read number).
pub struct SampleOutputRegistry<'a, S: SampleLookup + ?Sized> {
    samples: &'a S,
    output_dir: &'a Path,
    lane: usize,
    read_number: usize,
    compression: Compression,
    settings: CompressionSettings,
    outputs: AHashMap<String, SampleOutput>,
}

impl<'a, S: SampleLookup + ?Sized> SampleOutputRegistry<'a, S> {
    pub fn new(
        samples: &'a S,
        output_dir: &'a Path,
        lane: usize,
        read_number: usize,
        compression: Compression,
        settings: CompressionSettings,
    ) -> Self {
        Self {
            samples,
            output_dir,
            lane,
            read_number,
            compression,
            settings,
            outputs: AHashMap::new(),
        }
    }

    /// The number of open outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Writes the record to the output of the sample, opening it if needed.
    pub fn route_to(
        &mut self,
        sample: SampleRef,
        head: &[u8],
        seq: &[u8],
        qual: &[u8],
    ) -> Result<()> {
        let samples = self.samples;
        let metadata = samples.sample(sample);
        let name = metadata.demultiplexing_name();
        if !self.outputs.contains_key(name) {
            let output = self.open(sample, metadata)?;
            self.outputs.insert(name.to_string(), output);
        }
        if let Some(output) = self.outputs.get_mut(name) {
            output
                .writer
                .write_record(head, seq, qual)
                .with_context(|| format!("Failed to write to {}", output.path.display()))?;
            output.records += 1;
        }
        Ok(())
    }

    fn open(&self, sample: SampleRef, metadata: &SampleMetadata) -> Result<SampleOutput> {
        let path = self.output_dir.join(output_path(
            metadata,
            self.lane,
            self.read_number,
            self.compression,
        ));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        debug!("Opening {}", path.display());
        let writer = FastqWriter::create(&path, self.compression, self.settings)?;
        Ok(SampleOutput { sample, path, writer, records: 0 })
    }

    /// Flushes and closes every output, returning them sorted by path.
    ///
    /// Every output is closed even if closing one of them fails; the first error is returned.
    pub fn close_all(&mut self) -> Result<Vec<ClosedOutput>> {
        let mut closed = Vec::with_capacity(self.outputs.len());
        let mut first_error = None;
        for (_, output) in self.outputs.drain() {
            let path = output.path.clone();
            match output.writer.finish() {
                Ok(()) => closed.push(ClosedOutput {
                    sample: output.sample,
                    path: output.path,
                    records: output.records,
                }),
                Err(error) => {
                    if first_error.is_none() {
                        first_error =
                            Some(error.context(format!("Failed to close {}", path.display())));
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => {
                closed.sort_by(|a, b| a.path.cmp(&b.path));
                Ok(closed)
            }
        }
    }
}
