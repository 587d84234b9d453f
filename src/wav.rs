//! RIFF/WAVE PCM output files.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A PCM WAV file being written incrementally.
///
/// The header is written with a zero data size on creation and patched by
/// [`finalize`](WavFile::finalize). Payload arrives as pre-quantized
/// little-endian bytes; the writer task is the only component that touches
/// the file handle.
pub struct WavFile {
    path: PathBuf,
    writer: BufWriter<File>,
    data_bytes: u64,
}

impl WavFile {
    /// Creates the file and writes a placeholder header.
    pub fn create(
        path: impl AsRef<Path>,
        sample_rate: u32,
        channels: u16,
        bits_per_sample: u16,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        write_header(&mut writer, sample_rate, channels, bits_per_sample, 0)?;
        Ok(Self {
            path,
            writer,
            data_bytes: 0,
        })
    }

    /// Path this file is being written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended to the data chunk so far.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    /// Appends pre-quantized little-endian sample bytes to the data chunk.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    /// Patches the RIFF and data chunk sizes, flushes, and closes the file.
    ///
    /// Returns the final data chunk size in bytes.
    pub fn finalize(mut self) -> std::io::Result<u64> {
        let data_size = u32::try_from(self.data_bytes).unwrap_or(u32::MAX);

        self.writer.seek(SeekFrom::Start(4))?;
        self.writer.write_all(&(36 + data_size).to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(40))?;
        self.writer.write_all(&data_size.to_le_bytes())?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer.flush()?;

        Ok(self.data_bytes)
    }
}

fn write_header(
    writer: &mut BufWriter<File>,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_size: u32,
) -> std::io::Result<()> {
    let bytes_per_sample = u32::from(bits_per_sample / 8);

    // RIFF header
    writer.write_all(b"RIFF")?;
    writer.write_all(&(36 + data_size).to_le_bytes())?;
    writer.write_all(b"WAVE")?;

    // fmt chunk
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?; // PCM (integer)
    writer.write_all(&channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
    writer.write_all(&byte_rate.to_le_bytes())?;
    let block_align = channels * (bits_per_sample / 8);
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&bits_per_sample.to_le_bytes())?;

    // data chunk header
    writer.write_all(b"data")?;
    writer.write_all(&data_size.to_le_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_fields_16_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let mut wav = WavFile::create(&path, 48_000, 2, 16).unwrap();
        wav.write_bytes(&[0u8; 8]).unwrap();
        wav.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
        assert_eq!(&data[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes([data[22], data[23]]), 2); // channels
        assert_eq!(u32::from_le_bytes([data[24], data[25], data[26], data[27]]), 48_000);
        assert_eq!(u16::from_le_bytes([data[32], data[33]]), 4); // block align
        assert_eq!(u16::from_le_bytes([data[34], data[35]]), 16); // bits
        assert_eq!(u32::from_le_bytes([data[40], data[41], data[42], data[43]]), 8);
    }

    #[test]
    fn test_finalize_patches_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let mut wav = WavFile::create(&path, 48_000, 2, 32).unwrap();
        wav.write_bytes(&[0u8; 1024]).unwrap();
        wav.write_bytes(&[0u8; 512]).unwrap();
        assert_eq!(wav.data_bytes(), 1536);
        let written = wav.finalize().unwrap();
        assert_eq!(written, 1536);

        let data = std::fs::read(&path).unwrap();
        let riff_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let data_size = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        assert_eq!(riff_size, 36 + 1536);
        assert_eq!(data_size, 1536);
        assert_eq!(data.len(), 44 + 1536);
    }

    #[test]
    fn test_payload_bytes_land_after_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let mut wav = WavFile::create(&path, 16_000, 1, 16).unwrap();
        wav.write_bytes(&[0x34, 0x12, 0x78, 0x56]).unwrap();
        wav.finalize().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[44..48], &[0x34, 0x12, 0x78, 0x56]);
    }

    #[test]
    fn test_hound_can_read_produced_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");

        let mut wav = WavFile::create(&path, 44_100, 1, 16).unwrap();
        let samples: Vec<u8> = [100i16, -200, 300]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        wav.write_bytes(&samples).unwrap();
        wav.finalize().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        let read: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(read, vec![100, -200, 300]);
    }
}
