//! Mock audio source for testing without hardware.

/// Generates synthetic canonical-format audio for driving the handlers in
/// tests and CI environments.
///
/// # Example
///
/// ```
/// use duplex_capture::MockSource;
///
/// let mut mock = MockSource::new(48_000, 2);
/// mock.generate_silence(100);
/// mock.generate_sine(440.0, 0.5, 100);
/// let samples = mock.take_samples();
/// assert_eq!(samples.len(), 48_000 / 10 * 2 * 2);
/// ```
pub struct MockSource {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

impl MockSource {
    /// Creates a mock source with the given format.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            samples: Vec::new(),
        }
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the channel count.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn frames_for(&self, duration_ms: u64) -> usize {
        (u64::from(self.sample_rate) * duration_ms / 1000) as usize
    }

    /// Appends silence for the given duration in milliseconds.
    pub fn generate_silence(&mut self, duration_ms: u64) {
        let samples = self.frames_for(duration_ms) * self.channels as usize;
        self.samples.extend(std::iter::repeat(0.0).take(samples));
    }

    /// Appends a sine wave at the given frequency and linear amplitude.
    pub fn generate_sine(&mut self, frequency: f64, amplitude: f32, duration_ms: u64) {
        let frames = self.frames_for(duration_ms);
        let sample_rate = f64::from(self.sample_rate);

        for i in 0..frames {
            let t = i as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin() as f32 * amplitude;
            for _ in 0..self.channels {
                self.samples.push(value);
            }
        }
    }

    /// Appends a constant (DC) value, useful for exact-level assertions.
    pub fn generate_dc(&mut self, value: f32, duration_ms: u64) {
        let samples = self.frames_for(duration_ms) * self.channels as usize;
        self.samples.extend(std::iter::repeat(value).take(samples));
    }

    /// Takes all generated samples, leaving the source empty.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// Takes the generated audio as whole blocks of `frames` frames each;
    /// a trailing partial block is discarded.
    pub fn take_blocks(&mut self, frames: usize) -> Vec<Vec<f32>> {
        let block = frames * self.channels as usize;
        let samples = self.take_samples();
        samples
            .chunks_exact(block)
            .map(<[f32]>::to_vec)
            .collect()
    }
}
