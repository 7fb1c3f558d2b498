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
use tracing::{debug, error};

use crate::error::StreamError;
use crate::properties::{AudioProperties, MAX_CHANNELS};
use crate::request::ConversionRequest;

/// Applies the request's overrides to the source's reported properties and returns the
/// properties that will be declared in the output.
///
/// Overrides are applied in a fixed order: sample rate, loop enable, end (which is also the
/// stream length), end/length reconciliation, and finally loop start, which is relative to
/// the finalized length when negative.
pub fn resolve(
    source: &AudioProperties,
    request: &ConversionRequest,
) -> Result<AudioProperties, StreamError> {
    if source.sample_rate == 0 {
        return Err(invalid("input file has invalid sample rate value"));
    }
    if source.total_samples <= 0 {
        return Err(invalid("input file has no sample data"));
    }
    if source.channel_count == 0 {
        error!("Input file has no channels");
        return Err(StreamError::NoChannels);
    }
    if source.channel_count as usize > MAX_CHANNELS {
        return Err(invalid(&format!(
            "input file has {} channels, at most {} are supported",
            source.channel_count, MAX_CHANNELS
        )));
    }

    let mut sample_rate = source.sample_rate;
    let mut looping = source.loop_enabled;
    let mut total = source.total_samples as i64;
    let mut loop_start = source.loop_start as i64;
    let mut loop_end = source.loop_end as i64;

    if let Some(rate) = request.sample_rate {
        if rate == 0 {
            return Err(invalid("sample rate override must be positive"));
        }
        debug!(from = sample_rate, to = rate, "Overriding sample rate");
        sample_rate = rate;
    }

    if let Some(enable) = request.loop_enabled {
        if enable && !looping {
            loop_start = 0;
            loop_end = total;
        }
        looping = enable;
    }

    if let Some(end) = request.loop_end {
        let relative = end.is_relative();
        let end = end.to_samples(sample_rate);
        if !relative {
            let end = end.min(total);
            total = end;
            if looping {
                loop_end = end;
            }
        } else {
            total += end;
        }
        debug!(total, loop_end, "Applied end override");

        // Looping must never run past, or stop short of, the stream length.
        if looping && loop_end != total {
            if loop_end > total {
                loop_end = total;
            } else {
                total = loop_end;
            }
        }
    }

    if looping {
        if let Some(start) = request.loop_start {
            let relative = start.is_relative();
            let start = start.to_samples(sample_rate);
            loop_start = if relative { total + start } else { start };
            debug!(loop_start, "Applied start override");
        }
    }

    if total <= 0 {
        return Err(invalid(&format!(
            "stream length must be positive, attempted value: {}",
            total
        )));
    }
    if total > i32::MAX as i64 {
        return Err(invalid(&format!("stream length {} is too large", total)));
    }
    if looping {
        if loop_start < 0 {
            return Err(invalid(&format!(
                "negative starting loop point extends beyond the total stream length, attempted value: {}",
                loop_start
            )));
        }
        if loop_end <= loop_start {
            return Err(invalid(&format!(
                "starting loop point must be smaller than ending loop point (start: {}, end: {})",
                loop_start, loop_end
            )));
        }
        if loop_end > total {
            return Err(invalid(&format!(
                "ending loop point {} extends beyond the stream length {}",
                loop_end, total
            )));
        }
    } else {
        loop_start = 0;
        loop_end = 0;
    }

    Ok(AudioProperties {
        sample_rate,
        total_samples: total as i32,
        loop_enabled: looping,
        loop_start: loop_start as i32,
        loop_end: loop_end as i32,
        channel_count: source.channel_count,
    })
}

fn invalid(message: &str) -> StreamError {
    error!("{}", message);
    StreamError::InvalidParameters(message.to_string())
}
