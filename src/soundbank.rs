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
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::StreamError;
use crate::properties::ChannelSet;

const BANK_DATE: &str = "1996-03-19";
const SAMPLE_BANK: &str = "streamed_audio";
const ENVELOPE_NAME: &str = "envelope0";
const RELEASE_RATE: u8 = 10;

/// One step of an envelope: a `[delay, level]` pair or a terminating command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeStep {
    Point(u16, u16),
    Command(String),
}

/// An instrument playing one stream file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub release_rate: u8,
    pub envelope: String,
    pub sound: String,
}

/// The instrument bank that maps sequence instruments to stream files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Soundbank {
    pub date: String,
    pub sample_bank: String,
    pub envelopes: BTreeMap<String, Vec<EnvelopeStep>>,
    pub instruments: BTreeMap<String, Instrument>,
    /// One slot per instrument index up to the highest in use. Unused slots are null.
    pub instrument_list: Vec<Option<String>>,
}

impl Soundbank {
    /// Creates a bank with one instrument per enabled channel. `sounds` holds the stream name
    /// for each enabled channel, in order.
    pub fn new(channels: ChannelSet, sounds: &[String]) -> Result<Soundbank, StreamError> {
        if channels.is_empty() {
            error!("No channels to generate a soundbank for");
            return Err(StreamError::NoChannels);
        }
        if sounds.len() != channels.len() {
            error!(
                sounds = sounds.len(),
                channels = channels.len(),
                "Soundbank sound names don't match the channels"
            );
            return Err(StreamError::InvalidParameters(format!(
                "{} sound names for {} channels",
                sounds.len(),
                channels.len()
            )));
        }

        let mut envelopes = BTreeMap::new();
        envelopes.insert(
            ENVELOPE_NAME.to_string(),
            vec![
                EnvelopeStep::Point(1, 32700),
                EnvelopeStep::Point(1, 32700),
                EnvelopeStep::Point(32700, 29430),
                EnvelopeStep::Command("hang".to_string()),
            ],
        );

        let mut instruments = BTreeMap::new();
        let mut instrument_list = Vec::new();
        let mut sounds = sounds.iter();
        let highest = channels.iter().last().unwrap_or(0);
        for index in 0..=highest {
            if !channels.contains(index) {
                instrument_list.push(None);
                continue;
            }
            let name = format!("inst{}", index);
            let sound = sounds.next().cloned().unwrap_or_default();
            instruments.insert(
                name.clone(),
                Instrument {
                    release_rate: RELEASE_RATE,
                    envelope: ENVELOPE_NAME.to_string(),
                    sound,
                },
            );
            instrument_list.push(Some(name));
        }

        Ok(Soundbank {
            date: BANK_DATE.to_string(),
            sample_bank: SAMPLE_BANK.to_string(),
            envelopes,
            instruments,
            instrument_list,
        })
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        let mut text = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        text.push('\n');
        Ok(text)
    }

    /// Writes the bank as JSON.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), StreamError> {
        let path = path.as_ref();
        let text = self.to_json()?;
        fs::write(path, text).map_err(|e| {
            error!(path = ?path, err = %e, "Could not open soundbank file for writing");
            StreamError::CannotCreateFile {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        info!(path = ?path, instruments = self.instruments.len(), "Wrote soundbank");
        Ok(())
    }
}
