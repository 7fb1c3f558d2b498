// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use tracing::{debug, error, info};

// Brings the rubato Resampler trait methods into scope without clashing with our own type.
use rubato::Resampler as _;

use crate::aiff::BlockRenderer;
use crate::error::StreamError;
use crate::properties::{AudioProperties, ChannelSet, SAMPLE_BLOCK};
use crate::source::{loop_differs, RenderSource, StreamCursor};

/// Input block size for the sinc resampler.
const INPUT_BLOCK_SIZE: usize = SAMPLE_BLOCK as usize;

/// Resampled view of a resolved stream. Sample counts and loop points are in the target
/// rate's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampledProperties {
    /// The resolved, pre-resample properties this view is derived from.
    pub base: AudioProperties,
    pub target_rate: u32,
    pub total_samples: i32,
    pub loop_start: i32,
    pub loop_end: i32,
    /// The source's own loop metadata doesn't match the resolved loop window, so the
    /// decoder's loop wrap can't be relied on while rendering.
    pub loop_point_mismatch: bool,
}

impl ResampledProperties {
    /// The properties declared in the output container.
    pub fn declared(&self) -> AudioProperties {
        AudioProperties {
            sample_rate: self.target_rate,
            total_samples: self.total_samples,
            loop_enabled: self.base.loop_enabled,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            channel_count: self.base.channel_count,
        }
    }

    /// The conversion ratio from the resolved rate to the target rate.
    pub fn ratio(&self) -> f64 {
        self.target_rate as f64 / self.base.sample_rate as f64
    }
}

/// Plans a rate conversion, scaling the stream length and loop points to the target rate.
///
/// The loop start is derived from the scaled loop end and the scaled loop length rather than
/// scaled on its own, so the loop length can't drift by more than the rounding of one value.
pub fn plan(
    source: &AudioProperties,
    resolved: &AudioProperties,
    target_rate: u32,
) -> Result<ResampledProperties, StreamError> {
    if target_rate == 0 || resolved.sample_rate == 0 {
        error!(
            source_rate = resolved.sample_rate,
            target_rate, "Cannot resample with a zero sample rate"
        );
        return Err(StreamError::InvalidParameters(format!(
            "cannot resample from {} Hz to {} Hz",
            resolved.sample_rate, target_rate
        )));
    }

    let ratio = target_rate as f64 / resolved.sample_rate as f64;
    let scale = |samples: i32| (samples as f64 * ratio + 0.95).floor() as i64;

    let mut total = scale(resolved.total_samples);
    let (mut loop_start, mut loop_end) = (0i64, 0i64);

    if resolved.loop_enabled {
        loop_end = scale(resolved.loop_end);
        let length = ((resolved.loop_end - resolved.loop_start) as f64 * ratio).round() as i64;
        loop_start = (loop_end - length).max(0);

        if loop_end <= loop_start {
            debug!(loop_start, loop_end, "Resampled loop collapsed, forcing one sample");
            loop_end = loop_start + 1;
            total = total.max(loop_end);
        }
    }

    if total <= 0 || total > i32::MAX as i64 {
        error!(total, "Resampled stream length is out of range");
        return Err(StreamError::InvalidParameters(format!(
            "resampled stream length {} is out of range",
            total
        )));
    }

    let loop_point_mismatch = loop_differs(source, resolved);

    let planned = ResampledProperties {
        base: *resolved,
        target_rate,
        total_samples: total as i32,
        loop_start: loop_start as i32,
        loop_end: loop_end as i32,
        loop_point_mismatch,
    };
    info!(
        from = resolved.sample_rate,
        to = target_rate,
        total = planned.total_samples,
        loop_start = planned.loop_start,
        loop_end = planned.loop_end,
        loop_point_mismatch,
        "Planned resampling"
    );
    Ok(planned)
}

/// A streaming sinc resampler over planar f32 blocks. Dropping it releases the converter.
pub struct Resampler {
    inner: SincFixedIn<f32>,
    source_rate: u32,
    target_rate: u32,
    output: Vec<Vec<f32>>,
}

impl Resampler {
    /// Allocates a converter for the given channels and rates.
    pub fn new(
        channels: ChannelSet,
        source_rate: u32,
        target_rate: u32,
    ) -> Result<Resampler, StreamError> {
        if channels.is_empty() || source_rate == 0 || target_rate == 0 {
            error!(source_rate, target_rate, "Could not allocate resampler");
            return Err(StreamError::ResamplingFailed(source_rate, target_rate));
        }

        let sinc_params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            oversampling_factor: 128,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        let resample_ratio = target_rate as f64 / source_rate as f64;

        let inner = SincFixedIn::<f32>::new(
            resample_ratio,
            1.0,
            sinc_params,
            INPUT_BLOCK_SIZE,
            channels.len(),
        )
        .map_err(|e| {
            error!(source_rate, target_rate, err = %e, "Could not initialize resampler");
            StreamError::ResamplingFailed(source_rate, target_rate)
        })?;
        let output = inner.output_buffer_allocate(true);

        Ok(Resampler {
            inner,
            source_rate,
            target_rate,
            output,
        })
    }

    /// The number of input frames the next `convert` call consumes.
    pub fn input_frames_next(&self) -> usize {
        self.inner.input_frames_next()
    }

    /// The number of leading output frames that are converter latency rather than signal.
    pub fn output_delay(&self) -> usize {
        self.inner.output_delay()
    }

    /// Converts one block of planar input. Returns the converted frames, one slice per
    /// channel.
    pub fn convert(&mut self, input: &[Vec<f32>]) -> Result<Vec<&[f32]>, StreamError> {
        let (_consumed, produced) = self
            .inner
            .process_into_buffer(input, &mut self.output, None)
            .map_err(|e| {
                error!(
                    source_rate = self.source_rate,
                    target_rate = self.target_rate,
                    err = %e,
                    "Resampling failed"
                );
                StreamError::ResamplingFailed(self.source_rate, self.target_rate)
            })?;
        Ok(self.output.iter().map(|ch| &ch[..produced]).collect())
    }
}

/// Renders resampled blocks from a source, emulating the stream's loop in the source's rate
/// domain so the converter sees continuous audio across the loop point.
pub struct ResampledRenderer<'a, S: RenderSource + ?Sized> {
    cursor: StreamCursor<'a, S>,
    resampler: Resampler,
    interleaved: Vec<i16>,
    input: Vec<Vec<f32>>,
    /// Converted frames not yet handed out, one queue per channel.
    fifo: Vec<Vec<f32>>,
    /// Converter latency still to be dropped from the front of the output.
    delay_remaining: usize,
}

impl<'a, S: RenderSource + ?Sized> ResampledRenderer<'a, S> {
    pub fn new(
        source: &'a mut S,
        plan: &ResampledProperties,
    ) -> Result<ResampledRenderer<'a, S>, StreamError> {
        let resolved = plan.base;
        let channels = resolved.channels();
        let resampler = Resampler::new(channels, resolved.sample_rate, plan.target_rate)?;
        let cursor = StreamCursor::new(source, &resolved);
        let delay_remaining = resampler.output_delay();
        let count = channels.len();

        debug!(
            manual_loop = cursor.manual_loop(),
            delay = delay_remaining,
            "Starting resampled render"
        );

        Ok(ResampledRenderer {
            cursor,
            resampler,
            interleaved: vec![0; INPUT_BLOCK_SIZE * count],
            input: vec![Vec::with_capacity(INPUT_BLOCK_SIZE); count],
            fifo: vec![Vec::new(); count],
            delay_remaining,
        })
    }

    fn channel_count(&self) -> usize {
        self.input.len()
    }

    /// Fills the converter's input with the next `frames` frames of the stream. Once the stream
    /// has no more audio the input is silence.
    fn fill_input(&mut self, frames: usize) -> Result<(), StreamError> {
        let channels = self.channel_count();
        for ch in self.input.iter_mut() {
            ch.clear();
        }
        if self.interleaved.len() < frames * channels {
            self.interleaved.resize(frames * channels, 0);
        }

        let mut filled = 0;
        while filled < frames {
            let rendered = self.cursor.read(&mut self.interleaved, frames - filled)?;
            if rendered == 0 {
                break;
            }
            for frame in self.interleaved[..rendered * channels].chunks_exact(channels) {
                for (ch, &sample) in self.input.iter_mut().zip(frame) {
                    ch.push(sample as f32 / 32768.0);
                }
            }
            filled += rendered;
        }

        for ch in self.input.iter_mut() {
            ch.resize(frames, 0.0);
        }
        Ok(())
    }

    /// Converts input blocks until at least `frames` output frames are queued.
    fn fill_fifo(&mut self, frames: usize) -> Result<(), StreamError> {
        while self.fifo.first().map(|c| c.len()).unwrap_or(0) < frames {
            let needed = self.resampler.input_frames_next();
            self.fill_input(needed)?;
            let output = self.resampler.convert(&self.input)?;

            let produced = output.first().map(|c| c.len()).unwrap_or(0);
            let skip = self.delay_remaining.min(produced);
            self.delay_remaining -= skip;
            for (queue, converted) in self.fifo.iter_mut().zip(output) {
                queue.extend_from_slice(&converted[skip..]);
            }
        }
        Ok(())
    }
}

impl<S: RenderSource + ?Sized> BlockRenderer for ResampledRenderer<'_, S> {
    fn next_block(&mut self, planar: &mut [Vec<i16>], frames: usize) -> Result<usize, StreamError> {
        self.fill_fifo(frames)?;
        for (out, queue) in planar.iter_mut().zip(self.fifo.iter_mut()) {
            out.clear();
            out.extend(queue.drain(..frames).map(to_i16));
        }
        Ok(frames)
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn looping(total: i32, start: i32, end: i32) -> AudioProperties {
        AudioProperties::looping(44100, total, start, end, 2)
    }

    #[test]
    fn test_plan_scales_lengths() {
        let props = looping(100_000, 20_000, 90_000);
        let plan = plan(&props, &props, 22050).unwrap();
        assert_eq!(50_000, plan.total_samples);
        assert_eq!(45_000, plan.loop_end);
        assert_eq!(10_000, plan.loop_start);
        assert!(!plan.loop_point_mismatch);
        assert_eq!(22050, plan.declared().sample_rate);
        assert_eq!(50_000, plan.declared().total_samples);
    }

    #[test]
    fn test_plan_rounds_up_near_integers() {
        // 1000 * 32000 / 44100 = 725.62, +0.95 floors to 726.
        let props = AudioProperties::new(44100, 1000, 1);
        assert_eq!(726, plan(&props, &props, 32000).unwrap().total_samples);
        // 441 * 32000 / 44100 = 320 exactly, +0.95 stays 320.
        let props = AudioProperties::new(44100, 441, 1);
        assert_eq!(320, plan(&props, &props, 32000).unwrap().total_samples);
    }

    #[test]
    fn test_plan_loop_length_tracks_ratio() {
        let cases = [
            (1_000_000, 12_345, 987_654),
            (50_000, 0, 50_000),
            (44_100, 44_000, 44_100),
            (10, 3, 7),
        ];
        let mut ratio = 0.1f64;
        while ratio <= 10.0 {
            let target = (44100.0 * ratio).round() as u32;
            let exact_ratio = target as f64 / 44100.0;
            for (total, start, end) in cases {
                let props = looping(total, start, end);
                let plan = plan(&props, &props, target).unwrap();
                let expected = (end - start) as f64 * exact_ratio;
                let actual = (plan.loop_end - plan.loop_start) as f64;
                assert!(
                    (actual - expected).abs() <= 1.0,
                    "ratio {} loop {}..{}: expected ~{}, got {}",
                    exact_ratio,
                    start,
                    end,
                    expected,
                    actual
                );
                assert!(plan.loop_start >= 0);
                assert!(plan.loop_end <= plan.total_samples);
            }
            ratio += 0.1;
        }
    }

    #[test]
    fn test_plan_collapsed_loop_is_one_sample() {
        let props = looping(10, 9, 10);
        let plan = plan(&props, &props, 4410).unwrap();
        assert_eq!(1, plan.loop_end - plan.loop_start);
        assert!(plan.loop_end <= plan.total_samples);
    }

    #[test]
    fn test_plan_flags_loop_mismatch() {
        let source = looping(100_000, 20_000, 90_000);

        let mut resolved = source;
        resolved.loop_start = 10_000;
        assert!(plan(&source, &resolved, 32000).unwrap().loop_point_mismatch);

        let plain = AudioProperties::new(44100, 100_000, 2);
        let forced = looping(100_000, 0, 100_000);
        assert!(plan(&plain, &forced, 32000).unwrap().loop_point_mismatch);

        let mut disabled = source;
        disabled.loop_enabled = false;
        assert!(!plan(&source, &disabled, 32000).unwrap().loop_point_mismatch);
    }

    #[test]
    fn test_plan_rejects_zero_rate() {
        let props = AudioProperties::new(44100, 1000, 1);
        assert!(matches!(
            plan(&props, &props, 0),
            Err(StreamError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_resampler_rejects_zero_rate() {
        assert!(matches!(
            Resampler::new(ChannelSet::from_count(2), 0, 32000),
            Err(StreamError::ResamplingFailed(0, 32000))
        ));
        assert!(matches!(
            Resampler::new(ChannelSet::from_count(0), 44100, 32000),
            Err(StreamError::ResamplingFailed(44100, 32000))
        ));
    }

    #[test]
    fn test_resampler_converts_blocks() {
        let mut resampler = Resampler::new(ChannelSet::from_count(1), 44100, 22050).unwrap();
        let needed = resampler.input_frames_next();
        let input = vec![vec![0.25f32; needed]];
        let mut total = 0;
        for _ in 0..8 {
            total += resampler.convert(&input).unwrap()[0].len();
        }
        // Half as many frames out, less the converter's latency still held back.
        let delay = resampler.output_delay();
        assert!(delay > 0);
        let expected = 8 * needed / 2 - delay;
        assert!(total.abs_diff(expected) <= 8, "{} vs {}", total, expected);
    }

    #[test]
    fn test_renderer_produces_requested_frames() {
        let mut source = MemorySource::ramp(5000, 2, 44100);
        let props = source.properties();
        let plan = plan(&props, &props, 32000).unwrap();
        let mut renderer = ResampledRenderer::new(&mut source, &plan).unwrap();

        let mut planar = vec![Vec::new(); 2];
        for _ in 0..4 {
            assert_eq!(0x400, renderer.next_block(&mut planar, 0x400).unwrap());
            assert_eq!(0x400, planar[0].len());
            assert_eq!(0x400, planar[1].len());
        }
    }

    #[test]
    fn test_renderer_keeps_dc_level_across_loop() {
        // A constant signal stays constant when the loop is emulated, with no click at the
        // loop point.
        let frames = 4000;
        let samples = vec![8192i16; frames];
        let mut source = MemorySource::new(samples, 1, 44100).with_loop(1000, 3000);
        let props = source.properties();
        let plan = plan(&props, &props, 22050).unwrap();
        assert!(!plan.loop_point_mismatch);

        let mut renderer = ResampledRenderer::new(&mut source, &plan).unwrap();
        let mut planar = vec![Vec::new()];
        // Skip the first block, which holds the converter's ramp-in.
        renderer.next_block(&mut planar, 0x400).unwrap();
        for _ in 0..6 {
            renderer.next_block(&mut planar, 0x400).unwrap();
            for &sample in &planar[0] {
                assert!((sample as i32 - 8192).abs() < 200, "sample {}", sample);
            }
        }
    }

    #[test]
    fn test_renderer_loops_a_source_that_ends_early() {
        // The resolved loop runs to 3000 but the source only holds 2000 frames.
        let mut source = MemorySource::new(vec![8192i16; 2000], 1, 44100);
        let resolved = AudioProperties::looping(44100, 3000, 1000, 3000, 1);
        let plan = plan(&source.properties(), &resolved, 22050).unwrap();
        assert!(plan.loop_point_mismatch);

        let mut renderer = ResampledRenderer::new(&mut source, &plan).unwrap();
        let mut planar = vec![Vec::new()];
        renderer.next_block(&mut planar, 0x400).unwrap();
        for _ in 0..6 {
            renderer.next_block(&mut planar, 0x400).unwrap();
            for &sample in &planar[0] {
                assert!((sample as i32 - 8192).abs() < 200, "sample {}", sample);
            }
        }
    }

    #[test]
    fn test_renderer_pads_non_looping_with_silence() {
        let mut source = MemorySource::new(vec![8192i16; 2048], 1, 44100);
        let props = source.properties();
        let plan = plan(&props, &props, 44000).unwrap();
        let mut renderer = ResampledRenderer::new(&mut source, &plan).unwrap();
        let mut planar = vec![Vec::new()];
        for _ in 0..4 {
            renderer.next_block(&mut planar, 0x400).unwrap();
        }
        // Well past the end of the source and the converter's tail.
        renderer.next_block(&mut planar, 0x400).unwrap();
        assert!(planar[0].iter().all(|&s| s.abs() < 50));
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(i16::MAX, to_i16(2.0));
        assert_eq!(i16::MIN, to_i16(-2.0));
        assert_eq!(0, to_i16(0.0));
        assert_eq!(16384, to_i16(0.5));
    }
}
