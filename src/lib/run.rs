use anyhow::{ensure, Context, Result};
use log::info;

use crate::{
    locator::RunDirLocator,
    metrics::ReDemuxMetrics,
    opts::{Opts, LOGO},
    redemux::ReDemux,
    sample_sheet::{SampleLookup, SampleSheet},
};

/// Run re-demultiplexing.
pub fn run(opts: Opts) -> Result<ReDemuxMetrics> {
    eprint!("{}", LOGO);

    // Preflight checks
    ensure!(
        opts.output_dir.exists(),
        "Output directory does not exist: {}",
        &opts.output_dir.to_string_lossy()
    );
    ensure!(!opts.indexes.is_empty(), "At least one index must be specified");

    let sample_sheet = SampleSheet::from_path(&opts.sample_sheet).with_context(|| {
        format!("Failed to read the sample sheet {}", opts.sample_sheet.display())
    })?;
    info!("Read {} samples from {}", sample_sheet.samples.len(), opts.sample_sheet.display());

    let mut redemux = ReDemux::new(&sample_sheet, opts.redemux_config());
    for rule in &opts.indexes {
        let sample = redemux
            .add_rule(rule)
            .with_context(|| format!("Failed to resolve the index `{}`", rule))?;
        info!("Index {} resolves to sample {}", rule, sample_sheet.sample(sample).sample_id);
    }
    for (lane, catalog) in redemux.catalogs() {
        info!(
            "Lane {}: {} indexes for {} samples",
            lane,
            catalog.len(),
            catalog.samples().len()
        );
    }

    let run_dir = opts.run_dir();
    info!("Reading undetermined reads from {}", run_dir.display());
    let locator = RunDirLocator::new(&run_dir, opts.max_read_number);
    let metrics = redemux.run(&locator, &opts.output_dir)?;
    metrics.write_metrics_files(&opts.output_dir)?;

    info!(
        "Re-demultiplexed {} reads: {} written to samples, {} dropped",
        metrics.total_reads(),
        metrics.matched_reads(),
        metrics.dropped_reads()
    );
    if !metrics.skipped_lanes.is_empty() {
        info!("Skipped lanes without undetermined reads: {:?}", metrics.skipped_lanes);
    }
    Ok(metrics)
}
