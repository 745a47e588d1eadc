#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use crate::{
    index_catalog::{DEFAULT_INDEX_LENGTH, DEFAULT_MAX_MISMATCHES},
    locator::DEFAULT_MAX_READ_NUMBER,
    matcher::MatcherKind,
    redemux::{ReDemuxConfig, DEFAULT_MAX_LANES},
    utils::{built_info, CompressionSettings},
};

pub static LOGO: &str = "
██████╗ ███████╗██████╗ ███████╗███╗   ███╗██╗   ██╗██╗  ██╗
██╔══██╗██╔════╝██╔══██╗██╔════╝████╗ ████║██║   ██║╚██╗██╔╝
██████╔╝█████╗  ██║  ██║█████╗  ██╔████╔██║██║   ██║ ╚███╔╝
██╔══██╗██╔══╝  ██║  ██║██╔══╝  ██║╚██╔╝██║██║   ██║ ██╔██╗
██║  ██║███████╗██████╔╝███████╗██║ ╚═╝ ██║╚██████╔╝██╔╝ ██╗
╚═╝  ╚═╝╚══════╝╚═════╝ ╚══════╝╚═╝     ╚═╝ ╚═════╝ ╚═╝  ╚═╝
";

pub static TOOL_NAME: &str = "redemux";

pub static DOC_LINK_AND_SUPPORT_EMAIL: &str = "
For usage run: redemux --help
Please report problems together with the command line and the log of the run.
";

static SHORT_USAGE: &str =
    "Re-demultiplexes the undetermined reads of an Illumina run with revised sample indexes.";

static LONG_USAGE: &str = "
██████╗ ███████╗██████╗ ███████╗███╗   ███╗██╗   ██╗██╗  ██╗
██╔══██╗██╔════╝██╔══██╗██╔════╝████╗ ████║██║   ██║╚██╗██╔╝
██████╔╝█████╗  ██║  ██║█████╗  ██╔████╔██║██║   ██║ ╚███╔╝
██╔══██╗██╔══╝  ██║  ██║██╔══╝  ██║╚██╔╝██║██║   ██║ ██╔██╗
██║  ██║███████╗██████╔╝███████╗██║ ╚═╝ ██║╚██████╔╝██╔╝ ██╗
╚═╝  ╚═╝╚══════╝╚═════╝ ╚══════╝╚═╝     ╚═╝ ╚═════╝ ╚═╝  ╚═╝

Re-demultiplexes the undetermined reads of an Illumina run with revised sample indexes.

The undetermined reads of lane N are read from
`<run-dir>/Undetermined_indices/Sample_laneN/laneN_Undetermined_L00N_R<read>_*.fastq[.gz|.bz2]`,
where the run directory defaults to the directory of the sample sheet.  The sample barcode of a
read is the part of its name after the last `:`.

Each revised index is given as `<lane>:<index>` and resolved to one sample of that lane in the
sample sheet:
  - an exact index (e.g. `3:ATCACG`) goes to the sample with the closest index, allowing up to
    --max-mismatches mismatches, as long as no other sample is as close;
  - an index with `.` wildcards (e.g. `3:AT.AC.`) goes to the single sample whose index
    matches the pattern.
A read is written to a sample if its barcode is identical to (or matched by the pattern of) an
index of that sample only.  Other reads are dropped and counted in the metrics.

Reads are written to
`<output-dir>/Project_<project>/Sample_<name>/<name>_<index>_L00<lane>_R<read>_redemux_.fastq[.gz|.bz2]`
with the compression of the input.  The output directory must exist.

Example invocation:

redemux \\
  --sample-sheet run/SampleSheet.csv \\
  --indexes 3:ATCACG 3:AT.AC. 5:GGCTAC \\
  --output-dir redemuxed/
";

#[derive(Parser, Debug, Clone)]
#[clap(name = TOOL_NAME, version = built_info::VERSION.as_str(), about=SHORT_USAGE, long_about=LONG_USAGE, term_width=0)]
pub struct Opts {
    /// Path to the sample sheet of the run.
    #[clap(long, short = 's', display_order = 1)]
    pub sample_sheet: PathBuf,

    /// The revised indexes, each as `<lane>:<index>`.
    #[clap(long, short = 'i', display_order = 2, required = true, multiple_values = true)]
    pub indexes: Vec<String>,

    /// The directory to write outputs, the directory must exist.
    ///
    /// This tool will overwrite existing files.
    #[clap(long, short, display_order = 3)]
    pub output_dir: PathBuf,

    /// The run directory holding the `Undetermined_indices` directory.
    ///
    /// [default: the directory of the sample sheet]
    #[clap(long, short = 'r', display_order = 4)]
    pub run_dir: Option<PathBuf>,

    /// The length of the sample indexes.
    #[clap(long, default_value_t = DEFAULT_INDEX_LENGTH, display_order = 11)]
    pub index_length: usize,

    /// Number of mismatches allowed between an exact index and the index of the sample it
    /// resolves to.
    #[clap(long, default_value_t = DEFAULT_MAX_MISMATCHES, display_order = 11)]
    pub max_mismatches: usize,

    /// The largest lane number.
    #[clap(long, default_value_t = DEFAULT_MAX_LANES, display_order = 11)]
    pub max_lanes: usize,

    /// The largest read number of the undetermined FASTQs.
    #[clap(long, default_value_t = DEFAULT_MAX_READ_NUMBER, display_order = 11)]
    pub max_read_number: usize,

    /// Output the most frequent "unmatched" barcodes of each lane up to this number.
    ///
    /// If set to 0 unmatched barcodes will not be collected.
    #[clap(long, short = 'U', default_value = "1000", display_order = 21)]
    pub most_unmatched_to_output: usize,

    /// Number of lanes to process at the same time.
    #[clap(long, short = 't', default_value = "1", display_order = 31)]
    pub threads: usize,

    /// Number of threads for compressing each gzip output.
    ///
    /// If set to 0 or 1 the output is compressed on the thread processing the lane.
    #[clap(long, default_value = "0", display_order = 31)]
    pub compressor_threads: usize,

    /// The compression level of compressed outputs.
    #[clap(long, default_value = "6", display_order = 31)]
    pub compression_level: u32,

    /// Override the matcher heuristic.
    ///
    /// If the indexes of a lane expand to at most one million barcodes, the matches of all
    /// barcodes are precomputed.  Otherwise every index is checked for each read.
    ///
    /// This option allows for overriding that heuristic.
    ///
    /// [default: None]
    #[clap(long, possible_values=MatcherKind::possible_values(), display_order = 31)]
    pub override_matcher: Option<MatcherKind>,
}

impl Opts {
    /// The run directory, defaulting to the directory of the sample sheet.
    pub fn run_dir(&self) -> PathBuf {
        match &self.run_dir {
            Some(run_dir) => run_dir.clone(),
            None => match self.sample_sheet.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        }
    }

    /// Extract a [`ReDemuxConfig`] from the CLI opts.
    pub fn redemux_config(&self) -> ReDemuxConfig {
        ReDemuxConfig {
            index_length: self.index_length,
            max_mismatches: self.max_mismatches,
            max_lanes: self.max_lanes,
            threads: self.threads,
            compression: CompressionSettings {
                threads: self.compressor_threads,
                level: self.compression_level,
            },
            most_unmatched_to_output: self.most_unmatched_to_output,
            override_matcher: self.override_matcher,
        }
    }
}

/// Implement defaults that match the CLI options to allow for easier testing.
///
/// Note that these defaults exist only within test code.
#[cfg(test)]
impl Default for Opts {
    fn default() -> Self {
        Self {
            sample_sheet: PathBuf::default(),
            indexes: vec![],
            output_dir: PathBuf::default(),
            run_dir: None,
            index_length: DEFAULT_INDEX_LENGTH,
            max_mismatches: DEFAULT_MAX_MISMATCHES,
            max_lanes: DEFAULT_MAX_LANES,
            max_read_number: DEFAULT_MAX_READ_NUMBER,
            most_unmatched_to_output: 1_000,
            threads: 1,
            compressor_threads: 0,
            compression_level: 6,
            override_matcher: None,
        }
    }
}

/// Parse args and set up logging / tracing
pub fn setup() -> Opts {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    Opts::parse()
}
