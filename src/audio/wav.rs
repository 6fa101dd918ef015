use crate::{NeuroChatError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use tracing::{debug, info};

/// Write mono or interleaved samples as 16-bit PCM.
///
/// # Arguments
/// * `path` - Path to the output WAV file
/// * `samples` - Audio samples (f32, range -1.0 to 1.0)
/// * `sample_rate` - Sample rate in Hz
/// * `channels` - Number of channels
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    samples: &[f32],
    sample_rate: u32,
    channels: u16,
) -> Result<()> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)
        .map_err(|e| NeuroChatError::IOError(format!("Failed to create WAV writer: {}", e)))?;

    for &sample in samples {
        let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| NeuroChatError::IOError(format!("Failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| NeuroChatError::IOError(format!("Failed to finalize WAV file: {}", e)))?;

    info!(
        "Wrote {} samples to WAV file: {:?}",
        samples.len(),
        path.as_ref()
    );
    Ok(())
}

/// Read a WAV file as f32 samples.
///
/// # Returns
/// * Tuple of (interleaved samples, sample_rate, channels)
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32, u16)> {
    let mut reader = WavReader::open(path.as_ref())
        .map_err(|e| NeuroChatError::IOError(format!("Failed to open WAV file: {}", e)))?;

    let spec = reader.spec();

    debug!(
        "Reading WAV file: {} Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let read_err = |e: hound::Error| {
        NeuroChatError::AudioProcessingError(format!("Failed to read sample: {}", e))
    };

    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / i8::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        // 2^23
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / i32::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(read_err)?,
        (SampleFormat::Int, bits) => {
            return Err(NeuroChatError::AudioProcessingError(format!(
                "Unsupported bit depth: {}",
                bits
            )));
        }
    };

    debug!("Read {} samples from WAV file", samples.len());

    Ok((samples, spec.sample_rate, spec.channels))
}

/// Average interleaved frames down to a single channel.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_write_read_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let sample_rate = 22050;
        let samples: Vec<f32> = (0..sample_rate as usize)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();

        write_wav(&path, &samples, sample_rate, 1).unwrap();

        let (read_samples, read_rate, read_channels) = read_wav(&path).unwrap();
        assert_eq!(read_rate, sample_rate);
        assert_eq!(read_channels, 1);
        assert_eq!(read_samples.len(), samples.len());

        // i16 quantization
        for (original, read) in samples.iter().zip(read_samples.iter()) {
            assert!((original - read).abs() < 0.001);
        }
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_wav(dir.path().join("missing.wav")).is_err());
    }

    #[test]
    fn test_downmix_stereo() {
        let stereo = vec![0.5, 0.3, 0.7, 0.1];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.4).abs() < 0.001);
        assert!((mono[1] - 0.4).abs() < 0.001);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let mono = vec![0.1, 0.2];
        assert_eq!(downmix_to_mono(&mono, 1), mono);
    }
}
