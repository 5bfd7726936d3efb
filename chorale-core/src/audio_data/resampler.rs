use crate::audio_data::StereoSample;
use crate::error::{ChoraleError, Result};
use rubato::{FftFixedIn, Resampler};

/// Offline sample-rate converter for stereo buffers.
///
/// Used when a buffer registered with the audio system was decoded at a rate
/// that differs from the output rate. Runs on the client thread only.
pub struct StereoResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    chunk_size: usize,
}

impl StereoResampler {
    /// # Arguments
    /// * `source_sample_rate` - The sample rate of the input audio
    /// * `target_sample_rate` - The desired sample rate of the output audio
    /// * `chunk_size` - Optional size of processing chunks in frames (defaults to 1024)
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(ChoraleError::AudioFormat(
                "Sample rates must be greater than 0".to_string(),
            ));
        }

        let chunk_size = chunk_size.unwrap_or(1024);
        if chunk_size == 0 {
            return Err(ChoraleError::AudioFormat(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            chunk_size,
        })
    }

    /// Number of frames the resampled output of `frames` input frames holds.
    pub fn output_frames(&self, frames: usize) -> usize {
        (frames as f64 * self.resample_ratio()).round() as usize
    }

    /// Resamples a block of stereo frames.
    ///
    /// The resampler's group delay is trimmed from the front and the padded
    /// tail is cut, so the result holds exactly [`output_frames`](Self::output_frames)
    /// frames.
    pub fn resample(&self, frames: &[StereoSample]) -> Result<Vec<StereoSample>> {
        if self.source_sample_rate == self.target_sample_rate || frames.is_empty() {
            return Ok(frames.to_vec());
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2, // sub_chunks
            2, // stereo
        )
        .map_err(|e| ChoraleError::Resampling(format!("Failed to create resampler: {}", e)))?;

        let delay = resampler.output_delay();
        let wanted = self.output_frames(frames.len());

        let mut left_out = Vec::with_capacity(delay + wanted);
        let mut right_out = Vec::with_capacity(delay + wanted);
        let mut waves_in = vec![vec![0.0f32; self.chunk_size]; 2];
        let mut input_index = 0;

        // Keep feeding (silence once the input is exhausted) until the delayed
        // output covers the whole signal.
        while left_out.len() < delay + wanted {
            let (left_in, right_in) = waves_in.split_at_mut(1);
            for (i, (l, r)) in left_in[0].iter_mut().zip(right_in[0].iter_mut()).enumerate() {
                let sample = frames.get(input_index + i).copied().unwrap_or_default();
                *l = sample.normalized_left();
                *r = sample.normalized_right();
            }
            input_index += self.chunk_size;

            let waves_out = resampler
                .process(&waves_in, None)
                .map_err(|e| ChoraleError::Resampling(format!("Resampling error: {}", e)))?;

            left_out.extend_from_slice(&waves_out[0]);
            right_out.extend_from_slice(&waves_out[1]);
        }

        Ok(left_out[delay..delay + wanted]
            .iter()
            .zip(&right_out[delay..delay + wanted])
            .map(|(&l, &r)| StereoSample::from_normalized(l, r))
            .collect())
    }

    /// Returns the target (output) sample rate in Hz.
    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Returns the source (input) sample rate in Hz.
    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate
    }

    /// Calculates the resampling ratio (target/source).
    pub fn resample_ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resampler_creation() {
        let resampler = StereoResampler::new(44100, 48000, None).unwrap();
        assert_eq!(resampler.source_sample_rate(), 44100);
        assert_eq!(resampler.target_sample_rate(), 48000);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(StereoResampler::new(0, 48000, None).is_err());
        assert!(StereoResampler::new(44100, 0, None).is_err());
        assert!(StereoResampler::new(44100, 48000, Some(0)).is_err());
    }

    #[test]
    fn test_same_rate_is_identity() {
        let resampler = StereoResampler::new(44100, 44100, None).unwrap();
        let frames = vec![StereoSample::new(1, -1), StereoSample::new(100, 200)];
        assert_eq!(resampler.resample(&frames).unwrap(), frames);
    }

    #[test]
    fn test_upsampling_doubles_frame_count() {
        let resampler = StereoResampler::new(22050, 44100, Some(256)).unwrap();
        let frames = vec![StereoSample::new(1000, -1000); 1000];
        let out = resampler.resample(&frames).unwrap();
        assert_eq!(out.len(), 2000);
    }
}
