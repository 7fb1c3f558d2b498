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
use std::process::ExitCode;

use clap::{crate_version, error::ErrorKind, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use strm64::config::Overrides;
use strm64::convert;
use strm64::error::ExitStatus;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Generates streamed audio, sequence and soundbank files from an audio file.",
    after_help = "USAGE EXAMPLES\n    strm64 inputfile.wav -o outfiles -s 158462 -e 7485124\n    strm64 \"spaces not recommended.wav\" -l 1 -f 95000000\n    strm64 inputfile.flac -l false -e 0x10000"
)]
struct Cli {
    /// The audio file to convert.
    input: PathBuf,

    /// The output file name (default: same as input, not including extension).
    #[arg(short, long)]
    output: Option<String>,

    /// The sample rate to declare. This does NOT resample the audio.
    #[arg(short = 'r', long, allow_hyphen_values = true)]
    sample_rate: Option<String>,

    /// The sample rate to resample the audio to.
    #[arg(short = 'R', long, allow_hyphen_values = true)]
    resample_rate: Option<String>,

    /// Enables or disables the loop (default: value in source audio or false).
    #[arg(short = 'l', long = "loop", allow_hyphen_values = true)]
    loop_enabled: Option<String>,

    /// The loop start sample (default: value in source audio or 0).
    #[arg(short = 's', long, allow_hyphen_values = true)]
    loop_start: Option<String>,

    /// The loop start in microseconds.
    #[arg(short = 't', long, allow_hyphen_values = true)]
    loop_start_micros: Option<String>,

    /// The loop end sample, which is also the total sample count (default: length of source).
    #[arg(short = 'e', long, allow_hyphen_values = true)]
    loop_end: Option<String>,

    /// The loop end or total time in microseconds.
    #[arg(short = 'f', long, allow_hyphen_values = true)]
    loop_end_micros: Option<String>,

    /// The master volume of the sequence (default: 127).
    #[arg(short = 'v', long, allow_hyphen_values = true)]
    master_volume: Option<String>,

    /// The mute scale of the sequence (default: 63).
    #[arg(short = 'm', long, allow_hyphen_values = true)]
    mute_scale: Option<String>,

    /// The sequence duration in microseconds, 0 for an infinite loop (default: infinite when
    /// looping, otherwise the stream length).
    #[arg(short = 'd', long, allow_hyphen_values = true)]
    duration: Option<String>,

    /// Pans every sequence channel to the center.
    #[arg(short = 'M', long)]
    mono: bool,

    /// Don't generate a sequence file.
    #[arg(short = 'x', long)]
    no_sequence: bool,

    /// Don't generate a soundbank file.
    #[arg(short = 'y', long)]
    no_soundbank: bool,

    /// A YAML, TOML or JSON file with overrides. Command line values take precedence.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            output: self.output.clone(),
            sample_rate: self.sample_rate.clone(),
            resample_rate: self.resample_rate.clone(),
            loop_enabled: self.loop_enabled.clone(),
            loop_start: self.loop_start.clone(),
            loop_start_micros: self.loop_start_micros.clone(),
            loop_end: self.loop_end.clone(),
            loop_end_micros: self.loop_end_micros.clone(),
            master_volume: self.master_volume.clone(),
            mute_scale: self.mute_scale.clone(),
            duration_micros: self.duration.clone(),
            mono: self.mono.then_some(true),
            no_sequence: self.no_sequence.then_some(true),
            no_soundbank: self.no_soundbank.then_some(true),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitStatus::Success,
                _ => ExitStatus::BadArguments,
            };
            // Nothing more can be reported if stdout/stderr are gone.
            let _ = e.print();
            return status.into();
        }
    };

    let overrides = match &cli.config {
        Some(path) => match Overrides::deserialize(path) {
            Ok(file) => file.merge(cli.overrides()),
            Err(e) => {
                error!(path = ?path, err = %e, "Unable to load overrides file");
                return ExitStatus::BadArguments.into();
            }
        },
        None => cli.overrides(),
    };

    let options = overrides.into_options(&cli.input);
    info!(
        input = ?options.input,
        output = ?options.output_base,
        "Converting"
    );

    match convert::run(&options) {
        Ok(report) => {
            for warning in &report.warnings {
                warn!(err = %warning, "Generated output may not work");
            }
            let status = report.exit_status();
            if status == ExitStatus::Success {
                info!(
                    streams = report.streams.len(),
                    sequence = report.sequence.is_some(),
                    soundbank = report.soundbank.is_some(),
                    "Done"
                );
            }
            status.into()
        }
        Err(e) => {
            error!(err = %e, "Conversion failed");
            e.exit_code().into()
        }
    }
}
