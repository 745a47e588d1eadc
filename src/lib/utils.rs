//! Utility functions: build information, compression detection, and FASTQ reading and writing.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use bstr::ByteSlice;
use bzip2::{read::MultiBzDecoder, write::BzEncoder};
use flate2::read::MultiGzDecoder;
use gzp::{deflate::Gzip, ZBuilder, ZWriter, BUFSIZE};
use seq_io::fastq;

pub mod built_info {
    use lazy_static::lazy_static;
    include!(concat!(env!("OUT_DIR"), "/built.rs"));

    /// Get a software version string including
    ///   - Git commit hash
    ///   - Git dirty info (whether the repo had uncommitted changes)
    ///   - Cargo package version if no git info found
    fn get_software_version() -> String {
        let prefix = if let Some(s) = GIT_COMMIT_HASH {
            format!("{}-{}", PKG_VERSION, s[0..8].to_owned())
        } else {
            // This shouldn't happen
            PKG_VERSION.to_string()
        };
        let suffix = match GIT_DIRTY {
            Some(true) => "-dirty",
            _ => "",
        };
        format!("{}{}", prefix, suffix)
    }

    lazy_static! {
        /// Version of the software with git hash
        pub static ref VERSION: String = get_software_version();
    }
}

pub fn s(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_string()
}

/// The compression of a FASTQ file, implied by its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// `.gz` is gzip, `.bz2` is bzip2, anything else is uncompressed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            _ => Compression::None,
        }
    }

    /// The file name extension, including the leading dot, empty if uncompressed.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
        }
    }
}

/// The settings used when creating compressed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    /// The number of threads used for gzip compression, `0` compresses on the calling thread.
    pub threads: usize,
    /// The compression level.
    pub level: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self { threads: 0, level: 6 }
    }
}

/// A FASTQ reader over a possibly compressed file.
pub type FastqReader = fastq::Reader<Box<dyn Read + Send>>;

/// Opens the FASTQ file, decompressing based on the file name.
pub fn open_fastq_reader<P: AsRef<Path>>(path: P) -> Result<FastqReader> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::with_capacity(BUFSIZE, file);
    let reader: Box<dyn Read + Send> = match Compression::from_path(path) {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(reader)),
    };
    Ok(fastq::Reader::with_capacity(reader, BUFSIZE))
}

/// A writer of FASTQ records into a possibly compressed file.
///
/// [`FastqWriter::finish`] must be called to write the compression trailer.
pub enum FastqWriter {
    Plain(BufWriter<File>),
    Gzip(Box<dyn ZWriter>),
    Bzip2(BzEncoder<BufWriter<File>>),
}

impl FastqWriter {
    /// Creates (truncating) the file at the given path.
    pub fn create<P: AsRef<Path>>(
        path: P,
        compression: Compression,
        settings: CompressionSettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let writer = BufWriter::with_capacity(BUFSIZE, file);
        Ok(match compression {
            Compression::None => FastqWriter::Plain(writer),
            Compression::Gzip => FastqWriter::Gzip(
                ZBuilder::<Gzip, _>::new()
                    .num_threads(settings.threads)
                    .compression_level(gzp::Compression::new(settings.level.min(9)))
                    .from_writer(writer),
            ),
            Compression::Bzip2 => FastqWriter::Bzip2(BzEncoder::new(
                writer,
                bzip2::Compression::new(settings.level.clamp(1, 9)),
            )),
        })
    }

    /// Writes one 4-line FASTQ record.
    pub fn write_record(&mut self, head: &[u8], seq: &[u8], qual: &[u8]) -> std::io::Result<()> {
        self.write_all(b"@")?;
        self.write_all(head)?;
        self.write_all(b"\n")?;
        self.write_all(seq)?;
        self.write_all(b"\n+\n")?;
        self.write_all(qual)?;
        self.write_all(b"\n")
    }

    /// Flushes the writer and writes the compression trailer, if any.
    pub fn finish(self) -> Result<()> {
        match self {
            FastqWriter::Plain(mut writer) => writer.flush()?,
            FastqWriter::Gzip(mut writer) => writer.finish()?,
            FastqWriter::Bzip2(writer) => writer.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for FastqWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqWriter::Plain(writer) => writer.write(buf),
            FastqWriter::Gzip(writer) => writer.write(buf),
            FastqWriter::Bzip2(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqWriter::Plain(writer) => writer.flush(),
            FastqWriter::Gzip(writer) => writer.flush(),
            FastqWriter::Bzip2(writer) => writer.flush(),
        }
    }
}

/// The sample barcode embedded in a read name: everything after the last `:`.
///
/// The whole name is returned when there is no `:`.
pub fn embedded_barcode(head: &[u8]) -> &[u8] {
    let head = head.trim_end();
    match head.rfind_byte(b':') {
        Some(index) => &head[index + 1..],
        None => head,
    }
}


#[cfg(test)]
mod test {
    use std::{fs::File, io::Read};

    use rstest::rstest;
    use tempfile::tempdir;

    use super::{
        embedded_barcode,
        test_commons::{read_with_barcode, slurp_fastq, write_reads_to_file},
        Compression,
    };

    #[rstest]
    #[case("reads.fastq", Compression::None, "")]
    #[case("reads.fq", Compression::None, "")]
    #[case("reads.fastq.gz", Compression::Gzip, ".gz")]
    #[case("reads.fastq.bz2", Compression::Bzip2, ".bz2")]
    #[case("reads", Compression::None, "")]
    fn test_compression_from_path(
        #[case] name: &str,
        #[case] expected: Compression,
        #[case] extension: &str,
    ) {
        let compression = Compression::from_path(name);
        assert_eq!(compression, expected);
        assert_eq!(compression.extension(), extension);
    }

    #[rstest]
    #[case("reads.fastq")]
    #[case("reads.fastq.gz")]
    #[case("reads.fastq.bz2")]
    fn test_write_then_read(#[case] name: &str) {
        let dir = tempdir().unwrap();
        let path = dir.path().join(name);
        let reads = vec![read_with_barcode(1, 1, "ACGTAC"), read_with_barcode(1, 2, "TTTTTT")];
        let expected: Vec<_> =
            reads.iter().map(|r| (r.head.clone(), r.seq.clone(), r.qual.clone())).collect();
        assert_eq!(write_reads_to_file(reads, &path), 2);
        let actual: Vec<_> =
            slurp_fastq(&path).into_iter().map(|r| (r.head, r.seq, r.qual)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_gzip_output_is_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        write_reads_to_file(vec![read_with_barcode(1, 1, "ACGTAC")], &path);
        let mut magic = [0u8; 2];
        File::open(&path).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(magic, [31, 139]);
    }

    #[test]
    fn test_multi_member_gzip_input() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.fastq.gz");
        let second = dir.path().join("second.fastq.gz");
        write_reads_to_file(vec![read_with_barcode(1, 1, "ACGTAC")], &first);
        write_reads_to_file(vec![read_with_barcode(1, 2, "TTTTTT")], &second);

        let concatenated = dir.path().join("both.fastq.gz");
        let mut bytes = std::fs::read(&first).unwrap();
        bytes.extend(std::fs::read(&second).unwrap());
        std::fs::write(&concatenated, bytes).unwrap();

        assert_eq!(slurp_fastq(&concatenated).len(), 2);
    }

    #[rstest]
    #[case(b"H00233:4:AAAFGW3HV:3:1101:1:1000 1:N:0:CGATGT".to_vec(), b"CGATGT".to_vec())]
    #[case(b"HWI-ST:3:1101:1:1000#0/1:ACGTAC\r".to_vec(), b"ACGTAC".to_vec())]
    #[case(b"read:".to_vec(), b"".to_vec())]
    #[case(b"no_colon".to_vec(), b"no_colon".to_vec())]
    fn test_embedded_barcode(#[case] head: Vec<u8>, #[case] expected: Vec<u8>) {
        assert_eq!(embedded_barcode(&head), expected.as_slice());
    }
}
