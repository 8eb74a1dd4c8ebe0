//! Keyframe-aware ring buffer for one-writer, many-reader media fan-out.
//!
//! - [`RingWriter`] publishes frames into a ring of slots and manages its size;
//! - [`Ring`] is the shared read-side view (sequences, keyframe index, buffered time);
//! - [`RingReader`] walks slots one at a time;
//! - [`AVRingReader`] adds playback modes and timestamp rebasing on top;
//! - [`AVTrack`] / [`TrackView`] bundle a writer with readiness and rate statistics.

mod av_reader;
mod frame;
mod reader;
mod ring;
mod track;
mod writer;

pub use av_reader::{AVRingReader, ReadState};
pub use frame::{AVFrame, Payload};
pub use reader::RingReader;
pub use ring::{Ring, SlotRef};
pub use track::{AVTrack, TrackView};
pub use writer::RingWriter;
