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

/// Error types for stream, sequence and soundbank generation.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Resampling failed: {0}Hz -> {1}Hz")]
    ResamplingFailed(u32, u32),

    #[error("Could not open {} for writing: {source}", path.display())]
    CannotCreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No channels available for generation")]
    NoChannels,

    #[error("Precalculated {what} size does not match output (expected {expected} bytes, actual {actual} bytes)")]
    LayoutMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Audio file error: {0}")]
    AudioError(#[from] symphonia::core::errors::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Process exit codes. Zero is success, every other value names one failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    BadArguments = 1,
    InvalidParameters = 2,
    ResamplingFailed = 3,
    CannotCreateFile = 4,
    NoChannels = 5,
    LayoutMismatch = 6,
    DecodeFailed = 7,
    IoFailed = 8,
}

impl StreamError {
    /// Returns the exit status this error is reported with at the process boundary.
    pub fn exit_code(&self) -> ExitStatus {
        match self {
            StreamError::InvalidParameters(_) => ExitStatus::InvalidParameters,
            StreamError::ResamplingFailed(_, _) => ExitStatus::ResamplingFailed,
            StreamError::CannotCreateFile { .. } => ExitStatus::CannotCreateFile,
            StreamError::NoChannels => ExitStatus::NoChannels,
            StreamError::LayoutMismatch { .. } => ExitStatus::LayoutMismatch,
            StreamError::AudioError(_) => ExitStatus::DecodeFailed,
            StreamError::IoError(_) => ExitStatus::IoFailed,
        }
    }

    /// Whether the error means an artifact wasn't produced. Layout self-check failures are
    /// reported after the file is written, so they aren't fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::LayoutMismatch { .. })
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status as u8)
    }
}
