//! # Audio Module
//!
//! Playback core: one serialized session per guild, an external transcoder
//! per playing track, and a push channel of player events.
//!
//! ## Architecture
//!
//! ### [`player`] - Audio Player
//! - Owns every guild transition (join, play, pause, resume, seek, stop, leave)
//! - Writes the playback ledger before publishing the matching event
//! - Restarts looping tracks and restores guilds after a restart
//!
//! ### [`session`] / [`registry`] - Per-guild state
//! - A tokio mutex per guild serializes transitions
//! - A generation counter invalidates finish signals and progress ticks
//!   from earlier playbacks
//!
//! ### [`transcode`] - External decoder
//! - Spawns ffmpeg and probes durations with ffprobe
//! - The supervisor keeps every live process reachable for cleanup
//!
//! ### [`voice`] - Voice platform seam
//! - Traits the player talks to; the Discord implementation lives in `bot::voice`
//!
//! ### [`events`] - Event fan-out
//! - Bounded per-subscriber channels; slow subscribers lose events, never block
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Samples**: 32-bit float, little endian
//! - **Channels**: Stereo (2 channels)

pub mod events;
pub mod player;
pub mod registry;
pub mod session;
pub mod transcode;
pub mod voice;

#[cfg(test)]
pub mod testing;
