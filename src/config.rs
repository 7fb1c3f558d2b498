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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::request::{ConversionRequest, DurationMode, SampleOffset, SequenceSettings};

/// Typed error for config load/parse failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}

/// Largest sample offset a stream can address.
const MAX_SAMPLE_OFFSET: i64 = 0x1_0000_0000;

/// Raw override values from the command line or an overrides file. Numbers are kept as text
/// so that decimal, hex and boolean forms are accepted the same way from both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub output: Option<String>,
    pub sample_rate: Option<String>,
    pub resample_rate: Option<String>,
    pub loop_enabled: Option<String>,
    pub loop_start: Option<String>,
    pub loop_start_micros: Option<String>,
    pub loop_end: Option<String>,
    pub loop_end_micros: Option<String>,
    pub master_volume: Option<String>,
    pub mute_scale: Option<String>,
    pub duration_micros: Option<String>,
    pub mono: Option<bool>,
    pub no_sequence: Option<bool>,
    pub no_soundbank: Option<bool>,
}

impl Overrides {
    /// Parse overrides from a YAML, TOML or JSON file.
    pub fn deserialize(path: &Path) -> Result<Overrides, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Overrides>()?)
    }

    /// Layers `other` on top of these overrides. Values set in `other` win.
    pub fn merge(self, other: Overrides) -> Overrides {
        Overrides {
            output: other.output.or(self.output),
            sample_rate: other.sample_rate.or(self.sample_rate),
            resample_rate: other.resample_rate.or(self.resample_rate),
            loop_enabled: other.loop_enabled.or(self.loop_enabled),
            loop_start: other.loop_start.or(self.loop_start),
            loop_start_micros: other.loop_start_micros.or(self.loop_start_micros),
            loop_end: other.loop_end.or(self.loop_end),
            loop_end_micros: other.loop_end_micros.or(self.loop_end_micros),
            master_volume: other.master_volume.or(self.master_volume),
            mute_scale: other.mute_scale.or(self.mute_scale),
            duration_micros: other.duration_micros.or(self.duration_micros),
            mono: other.mono.or(self.mono),
            no_sequence: other.no_sequence.or(self.no_sequence),
            no_soundbank: other.no_soundbank.or(self.no_soundbank),
        }
    }

    /// Validates the overrides into options for one run. Invalid values are logged and skipped.
    pub fn into_options(self, input: &Path) -> RunOptions {
        let sample_rate = parameter("sample rate", self.sample_rate.as_deref(), positive_rate);
        let resample_rate =
            parameter("resample rate", self.resample_rate.as_deref(), positive_rate);
        let explicit_loop = parameter(
            "loop enable/disable",
            self.loop_enabled.as_deref(),
            |v| match v {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
        );

        let loop_start = offset(
            "loop start",
            self.loop_start.as_deref(),
            self.loop_start_micros.as_deref(),
        );
        let loop_end = offset(
            "loop end",
            self.loop_end.as_deref(),
            self.loop_end_micros.as_deref(),
        );

        // Setting a loop start turns looping on unless it was explicitly turned off.
        let loop_enabled = match (explicit_loop, loop_start) {
            (Some(enabled), _) => Some(enabled),
            (None, Some(_)) => Some(true),
            (None, None) => None,
        };

        let mut sequence = SequenceSettings::default();
        if let Some(mute_scale) =
            parameter("sequence mute scale", self.mute_scale.as_deref(), |v| {
                match v {
                    -128..=127 => Some(v as i8),
                    128..=255 => Some((v - 256) as i8),
                    _ => None,
                }
            })
        {
            sequence.mute_scale = mute_scale;
        }
        if let Some(volume) = parameter(
            "sequence master volume",
            self.master_volume.as_deref(),
            |v| u8::try_from(v).ok(),
        ) {
            sequence.master_volume = volume;
        }
        sequence.duration = parameter(
            "sequence duration",
            self.duration_micros.as_deref(),
            |v| match v {
                0 => Some(DurationMode::Infinite),
                v if v > 0 => Some(DurationMode::Finite(Duration::from_micros(v as u64))),
                _ => None,
            },
        );
        sequence.force_mono = self.mono.unwrap_or(false);

        RunOptions {
            input: input.to_path_buf(),
            output_base: output_base(input, self.output.as_deref()),
            request: ConversionRequest {
                sample_rate,
                resample_rate,
                loop_enabled,
                loop_start,
                loop_end,
            },
            sequence,
            generate_sequence: !self.no_sequence.unwrap_or(false),
            generate_soundbank: !self.no_soundbank.unwrap_or(false),
        }
    }
}

/// Everything one conversion run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Output path without extension or channel suffix.
    pub output_base: PathBuf,
    pub request: ConversionRequest,
    pub sequence: SequenceSettings,
    pub generate_sequence: bool,
    pub generate_soundbank: bool,
}

/// Parses a number given as decimal, `0x` hex, or `true`/`false`.
pub fn parse_number(input: &str) -> Result<i64, ConfigError> {
    let value = input.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" => return Ok(1),
        "false" => return Ok(0),
        _ => {}
    }

    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.as_str()),
    };
    let parsed = match digits.strip_prefix("0x") {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => digits.parse::<i64>(),
    }
    .map_err(|_| ConfigError::InvalidNumber(input.to_string()))?;

    Ok(if negative { -parsed } else { parsed })
}

fn parameter<T>(name: &str, value: Option<&str>, check: impl Fn(i64) -> Option<T>) -> Option<T> {
    let value = value?;
    let checked = parse_number(value).ok().and_then(check);
    if checked.is_none() {
        warn!(parameter = name, value, "Invalid value used for parameter, skipping");
    }
    checked
}

fn positive_rate(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|&rate| rate > 0)
}

/// Picks a sample or microsecond offset. Samples take precedence when both are given.
fn offset(name: &str, samples: Option<&str>, micros: Option<&str>) -> Option<SampleOffset> {
    let samples = parameter(name, samples, |v| {
        (v < MAX_SAMPLE_OFFSET).then_some(SampleOffset::Samples(v))
    });
    let micros = parameter(name, micros, |v| Some(SampleOffset::Micros(v)));
    if samples.is_some() && micros.is_some() {
        debug!(parameter = name, "Both samples and microseconds given, using samples");
    }
    samples.or(micros)
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Strips the extension from the last path component, if it has one.
fn strip_extension(name: &str) -> &str {
    let slash = name.rfind(is_separator);
    match name.rfind('.') {
        Some(period) if slash.map_or(true, |s| s < period) => &name[..period],
        _ => name,
    }
}

/// Whether an output name holds characters that can't be used in a file name.
fn has_illegal_characters(name: &str) -> bool {
    if name.contains(['*', '?', '"', '<', '>', '|']) {
        return true;
    }
    match (name.rfind(':'), name.rfind(is_separator)) {
        (Some(colon), Some(slash)) => colon > slash,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Works out the base output path from the input path and an optional output name.
///
/// Without an output name the input path is used without its extension. An output name
/// ending in a separator is a directory and gets the input's name appended.
pub fn output_base(input: &Path, output: Option<&str>) -> PathBuf {
    let input = input.to_string_lossy();
    let input_name = match input.rfind(is_separator) {
        Some(slash) => &input[slash + 1..],
        None => &input[..],
    };

    let base = match output {
        Some(output) if has_illegal_characters(output) => {
            warn!(
                output,
                "Output filename contains illegal format/characters. Output argument will be ignored."
            );
            strip_extension(&input).to_string()
        }
        Some(output) if output.ends_with(is_separator) => {
            format!("{}{}", output, strip_extension(input_name))
        }
        Some(output) => output.to_string(),
        None => strip_extension(&input).to_string(),
    };

    PathBuf::from(base.replace(' ', "_"))
}
