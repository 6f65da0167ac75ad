//! Telephony wire format: 16-bit signed little-endian linear PCM, mono,
//! 8 kHz, base64-wrapped per frame. SPEC_FULL.md §4.1.

use ringline_domain::error::{Error, Result};

pub const SAMPLE_RATE_HZ: u32 = 8_000;
pub const BITS_PER_SAMPLE: u16 = 16;
pub const CHANNELS: u16 = 1;
/// Bytes per millisecond of audio at 8 kHz/16-bit/mono.
const BYTES_PER_MS: usize = 16;

/// A source container a TTS provider may hand back before it is
/// transcoded to telephony PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Wav,
    Mp3,
}

pub fn decode(b64: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| Error::AudioFormat(format!("invalid base64 payload: {e}")))
}

pub fn encode(pcm: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(pcm)
}

/// Splits `pcm` into consecutive slices of exactly `duration_ms * 16`
/// bytes; the final slice may be shorter.
pub fn chunk(pcm: &[u8], duration_ms: usize) -> Vec<&[u8]> {
    let chunk_len = duration_ms * BYTES_PER_MS;
    if chunk_len == 0 {
        return vec![pcm];
    }
    pcm.chunks(chunk_len).collect()
}

pub fn duration_ms(pcm: &[u8]) -> usize {
    pcm.len() / BYTES_PER_MS
}

/// Prepends a canonical 44-byte RIFF/WAVE header.
pub fn wrap_wav(pcm: &[u8]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::AudioFormat(format!("wav header write failed: {e}")))?;
        for frame in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([frame[0], frame[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| Error::AudioFormat(format!("wav sample write failed: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::AudioFormat(format!("wav finalize failed: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Mixes an interleaved multi-channel signal down to mono by averaging
/// each frame's channels.
fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Resamples mono PCM from `from_hz` to `to_hz` via a windowed-sinc
/// interpolator — the sinc kernel's stopband is the low-pass filter,
/// convolution at the target rate is the decimation (§4.1).
fn resample_mono(samples: &[i16], from_hz: u32, to_hz: u32) -> Result<Vec<i16>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let input: Vec<f64> = samples.iter().map(|&s| s as f64 / i16::MAX as f64).collect();
    let ratio = to_hz as f64 / from_hz as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f64>::new(ratio, 2.0, params, input.len(), 1)
        .map_err(|e| Error::AudioFormat(format!("resampler init failed: {e}")))?;
    let output = resampler
        .process(&[input], None)
        .map_err(|e| Error::AudioFormat(format!("resample failed: {e}")))?;

    Ok(output[0]
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f64) as i16)
        .collect())
}

/// Transcodes `source_bytes` (in `source_format`) into telephony PCM:
/// 8 kHz mono 16-bit, downmixing multi-channel input and resampling any
/// other source rate via low-pass + decimation (§4.1).
pub fn transcode(source_bytes: &[u8], source_format: SourceFormat) -> Result<Vec<u8>> {
    let (samples, sample_rate, channels) = match source_format {
        SourceFormat::Wav => {
            let cursor = std::io::Cursor::new(source_bytes);
            let mut reader = hound::WavReader::new(cursor)
                .map_err(|e| Error::AudioFormat(format!("invalid wav container: {e}")))?;
            let spec = reader.spec();
            if spec.bits_per_sample != BITS_PER_SAMPLE {
                return Err(Error::AudioFormat(format!(
                    "unsupported wav bit depth: {}bit (expected {}bit)",
                    spec.bits_per_sample, BITS_PER_SAMPLE
                )));
            }
            let samples = reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<i16>, _>>()
                .map_err(|e| Error::AudioFormat(format!("wav sample decode failed: {e}")))?;
            (samples, spec.sample_rate, spec.channels)
        }
        SourceFormat::Mp3 => {
            let cursor = std::io::Cursor::new(source_bytes.to_vec());
            let decoder = rodio::Decoder::new_mp3(cursor)
                .map_err(|e| Error::AudioFormat(format!("invalid mp3 container: {e}")))?;
            let sample_rate = decoder.sample_rate();
            let channels = decoder.channels();
            (decoder.collect(), sample_rate, channels)
        }
    };

    let mono = downmix_to_mono(&samples, channels);
    let resampled = resample_mono(&mono, sample_rate, SAMPLE_RATE_HZ)?;
    Ok(resampled.iter().flat_map(|s| s.to_le_bytes()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip_is_identity() {
        let pcm: Vec<u8> = (0u8..=255).collect();
        let encoded = encode(&pcm);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode("not valid base64 !!!").is_err());
    }

    #[test]
    fn duration_ms_additive_over_chunk_concat() {
        let pcm = vec![0u8; 1600]; // 100ms
        let chunks = chunk(&pcm, 20);
        let total: usize = chunks.iter().map(|c| duration_ms(c)).sum();
        assert_eq!(total, duration_ms(&pcm));
    }

    #[test]
    fn chunk_final_slice_may_be_shorter() {
        let pcm = vec![0u8; 350];
        let chunks = chunk(&pcm, 20); // 320 bytes per chunk
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 320);
        assert_eq!(chunks[1].len(), 30);
    }

    #[test]
    fn duration_ms_floors_partial_frame() {
        // 17 bytes is not an integral number of 16-byte ms-units.
        let pcm = vec![0u8; 17];
        assert_eq!(duration_ms(&pcm), 1);
    }

    #[test]
    fn wrap_wav_then_transcode_roundtrips_pcm() {
        let pcm: Vec<u8> = (0i16..100)
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let wav = wrap_wav(&pcm).unwrap();
        let back = transcode(&wav, SourceFormat::Wav).unwrap();
        assert_eq!(back, pcm);
    }

    #[test]
    fn transcode_rejects_wrong_bit_depth() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 8,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            w.write_sample(0i8).unwrap();
            w.finalize().unwrap();
        }
        let bytes = cursor.into_inner();
        assert!(transcode(&bytes, SourceFormat::Wav).is_err());
    }

    #[test]
    fn transcode_downsamples_higher_sample_rate() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..1600i32 {
                let sample = (8000.0 * (i as f64 * 0.05).sin()) as i16;
                w.write_sample(sample).unwrap();
            }
            w.finalize().unwrap();
        }
        let bytes = cursor.into_inner();
        let pcm = transcode(&bytes, SourceFormat::Wav).unwrap();
        // 1600 samples at 16kHz is 100ms; at 8kHz that's ~800 samples.
        let sample_count = pcm.len() / 2;
        assert!((700..=900).contains(&sample_count), "got {sample_count} samples");
    }

    #[test]
    fn transcode_downmixes_stereo_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut w = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..50 {
                w.write_sample(100i16).unwrap();
                w.write_sample(-100i16).unwrap();
            }
            w.finalize().unwrap();
        }
        let bytes = cursor.into_inner();
        let pcm = transcode(&bytes, SourceFormat::Wav).unwrap();
        assert_eq!(pcm.len() / 2, 50);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
    }
}
