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
pub mod cursor;
pub mod decoder;
pub mod memory;
pub mod smpl;

pub use cursor::{loop_differs, StreamCursor};
pub use decoder::SymphoniaSource;
pub use memory::MemorySource;

use crate::error::StreamError;
use crate::properties::AudioProperties;

/// A decoded audio source that renders interleaved 16-bit frames.
pub trait RenderSource {
    /// The properties the source reports, before any overrides.
    fn properties(&self) -> AudioProperties;

    /// Renders up to `frames` interleaved frames into the buffer, which must hold at least
    /// `frames * channel_count` samples. Returns the number of frames rendered, 0 at the end.
    fn render(&mut self, buffer: &mut [i16], frames: usize) -> Result<usize, StreamError>;

    /// Moves the read position to the given frame.
    fn seek(&mut self, frame: u64) -> Result<(), StreamError>;

    /// Whether the source wraps from its own loop end back to its loop start while rendering.
    fn wraps_at_loop_end(&self) -> bool {
        false
    }
}

impl<S: RenderSource + ?Sized> RenderSource for Box<S> {
    fn properties(&self) -> AudioProperties {
        (**self).properties()
    }

    fn render(&mut self, buffer: &mut [i16], frames: usize) -> Result<usize, StreamError> {
        (**self).render(buffer, frames)
    }

    fn seek(&mut self, frame: u64) -> Result<(), StreamError> {
        (**self).seek(frame)
    }

    fn wraps_at_loop_end(&self) -> bool {
        (**self).wraps_at_loop_end()
    }
}

/// Opens an audio file for rendering, detecting its format.
pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Box<dyn RenderSource>, StreamError> {
    Ok(Box::new(SymphoniaSource::from_file(path)?))
}
