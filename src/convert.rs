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
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, span, Level};

use crate::aiff::{self, StreamNames};
use crate::config::RunOptions;
use crate::error::{ExitStatus, StreamError};
use crate::loops;
use crate::properties::{samples_to_micros, AudioProperties};
use crate::request::DurationMode;
use crate::resample;
use crate::sequence::{self, SequenceFile};
use crate::soundbank::Soundbank;
use crate::source::{self, RenderSource};

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// The properties written to the streams.
    pub declared: Option<AudioProperties>,
    pub streams: Vec<PathBuf>,
    pub sequence: Option<PathBuf>,
    pub soundbank: Option<PathBuf>,
    /// Self-check failures that didn't stop generation.
    pub warnings: Vec<StreamError>,
    /// Artifacts that failed. The others were still generated.
    pub errors: Vec<StreamError>,
}

impl RunReport {
    /// Files a failure as an error or, when the artifact was still written, a warning.
    pub fn record(&mut self, e: StreamError) {
        if e.is_fatal() {
            self.errors.push(e);
        } else {
            self.warnings.push(e);
        }
    }

    /// The exit status for the run: the first failure, then any self-check warning.
    pub fn exit_status(&self) -> ExitStatus {
        if let Some(e) = self.errors.first() {
            return e.exit_code();
        }
        if let Some(w) = self.warnings.first() {
            return w.exit_code();
        }
        ExitStatus::Success
    }
}

/// The sequence duration when none is requested: forever for looping streams, otherwise
/// the length of the stream.
pub fn default_duration(declared: &AudioProperties) -> DurationMode {
    if declared.loop_enabled {
        DurationMode::Infinite
    } else {
        let micros = samples_to_micros(declared.sample_rate, declared.total_samples as i64);
        DurationMode::Finite(Duration::from_micros(micros.max(0) as u64))
    }
}

/// Opens the input file and converts it.
pub fn run(options: &RunOptions) -> Result<RunReport, StreamError> {
    let mut source = source::open(&options.input).map_err(|e| {
        error!(path = ?options.input, err = %e, "Could not open input file");
        e
    })?;
    convert(source.as_mut(), options)
}

/// Converts a source into streams, a sequence and a soundbank.
///
/// Loop resolution and resample planning failures abort the run. After that each artifact
/// is generated on its own, and a failure in one is recorded without stopping the others.
pub fn convert<S: RenderSource + ?Sized>(
    source: &mut S,
    options: &RunOptions,
) -> Result<RunReport, StreamError> {
    let span = span!(Level::INFO, "convert", input = ?options.input);
    let _enter = span.enter();

    let source_properties = source.properties();
    let resolved = loops::resolve(&source_properties, &options.request)?;
    let resampled = match options.request.resample_rate {
        Some(rate) if rate != resolved.sample_rate => {
            Some(resample::plan(&source_properties, &resolved, rate)?)
        }
        Some(rate) => {
            debug!(rate, "Resample rate matches the stream, not resampling");
            None
        }
        None => None,
    };
    let declared = resampled.map(|r| r.declared()).unwrap_or(resolved);
    let channels = declared.channels();
    let names = StreamNames::new(&options.output_base, channels.len(), &options.input);

    let mut report = RunReport {
        declared: Some(declared),
        ..Default::default()
    };

    match aiff::write_streams(source, &resolved, resampled.as_ref(), &names) {
        Ok(written) => {
            written.warnings.into_iter().for_each(|w| report.record(w));
            report.streams = names.paths.clone();
        }
        Err(e) => {
            error!(err = %e, "Stream generation failed");
            report.record(e);
        }
    }

    if options.generate_sequence {
        let mode = options
            .sequence
            .duration
            .unwrap_or_else(|| default_duration(&declared));
        let path = sequence::sequence_path(&options.output_base);
        info!(
            path = ?path,
            mode = ?mode,
            mute_scale = options.sequence.mute_scale,
            volume = options.sequence.master_volume,
            mono = options.sequence.force_mono,
            "Generating sequence file"
        );
        match SequenceFile::new(channels, options.sequence, mode).and_then(|seq| seq.write(&path)) {
            Ok(warnings) => {
                warnings.into_iter().for_each(|w| report.record(w));
                report.sequence = Some(path);
            }
            Err(e) => {
                error!(err = %e, "Sequence generation failed");
                report.record(e);
            }
        }
    }

    if options.generate_soundbank {
        let path = sequence::prefixed_path(&options.output_base, "json");
        info!(path = ?path, "Generating soundbank file");
        match Soundbank::new(channels, &names.sound_names()).and_then(|bank| bank.write(&path)) {
            Ok(()) => report.soundbank = Some(path),
            Err(e) => {
                error!(err = %e, "Soundbank generation failed");
                report.record(e);
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::Overrides;
    use crate::request::SampleOffset;
    use crate::source::MemorySource;

    fn options(dir: &Path, overrides: Overrides) -> RunOptions {
        let mut options = overrides.into_options(&dir.join("song.wav"));
        options.output_base = dir.join("song");
        options
    }

    #[test]
    fn test_default_duration() {
        let looped = AudioProperties::looping(32000, 64000, 0, 64000, 1);
        assert_eq!(DurationMode::Infinite, default_duration(&looped));
        let plain = AudioProperties::new(32000, 64000, 1);
        assert_eq!(
            DurationMode::Finite(Duration::from_secs(2)),
            default_duration(&plain)
        );
    }

    #[test]
    fn test_convert_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::ramp(5000, 2, 32000);
        let report = convert(&mut source, &options(dir.path(), Overrides::default())).unwrap();

        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(ExitStatus::Success, report.exit_status());
        assert_eq!(
            vec![dir.path().join("song_L.aiff"), dir.path().join("song_R.aiff")],
            report.streams
        );
        assert_eq!(Some(dir.path().join("XX_song.m64")), report.sequence);
        assert_eq!(Some(dir.path().join("XX_song.json")), report.soundbank);
        for path in report.streams.iter() {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_convert_skips_disabled_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::ramp(100, 1, 32000);
        let overrides = Overrides {
            no_sequence: Some(true),
            no_soundbank: Some(true),
            ..Default::default()
        };
        let report = convert(&mut source, &options(dir.path(), overrides)).unwrap();
        assert_eq!(vec![dir.path().join("song.aiff")], report.streams);
        assert_eq!(None, report.sequence);
        assert_eq!(None, report.soundbank);
        assert!(!dir.path().join("XX_song.m64").exists());
    }

    #[test]
    fn test_stream_failure_still_writes_sequence() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the stream file should go makes only the stream fail.
        std::fs::create_dir(dir.path().join("song.aiff")).unwrap();
        let mut source = MemorySource::ramp(100, 1, 32000);
        let report = convert(&mut source, &options(dir.path(), Overrides::default())).unwrap();

        assert_eq!(1, report.errors.len());
        assert!(matches!(
            report.errors[0],
            StreamError::CannotCreateFile { .. }
        ));
        assert_eq!(ExitStatus::CannotCreateFile, report.exit_status());
        assert!(report.streams.is_empty());
        assert!(dir.path().join("XX_song.m64").is_file());
        assert!(dir.path().join("XX_song.json").is_file());
    }

    #[test]
    fn test_report_files_failures_by_severity() {
        let mut report = RunReport::default();
        assert_eq!(ExitStatus::Success, report.exit_status());

        report.record(StreamError::LayoutMismatch {
            what: "track data",
            expected: 9,
            actual: 10,
        });
        assert_eq!(1, report.warnings.len());
        assert!(report.errors.is_empty());
        assert_eq!(ExitStatus::LayoutMismatch, report.exit_status());

        report.record(StreamError::NoChannels);
        assert_eq!(1, report.errors.len());
        assert_eq!(ExitStatus::NoChannels, report.exit_status());
    }

    #[test]
    fn test_invalid_loop_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::ramp(100, 1, 32000);
        let mut options = options(dir.path(), Overrides::default());
        options.request.loop_enabled = Some(true);
        options.request.loop_start = Some(SampleOffset::Samples(100));
        assert!(matches!(
            convert(&mut source, &options),
            Err(StreamError::InvalidParameters(_))
        ));
        assert!(!dir.path().join("song.aiff").exists());
    }

    #[test]
    fn test_same_resample_rate_is_not_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemorySource::ramp(1000, 1, 32000);
        let mut options = options(dir.path(), Overrides::default());
        options.request.resample_rate = Some(32000);
        let report = convert(&mut source, &options).unwrap();
        assert_eq!(Some(1000), report.declared.map(|d| d.total_samples));
    }
}
