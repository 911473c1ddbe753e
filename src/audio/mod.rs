//! # Audio Module
//!
//! Per-guild playback: what is playing, what comes next, and how frames reach
//! the voice connection.
//!
//! ## Architecture
//!
//! ### [`engine`] / [`player`] - Playback Engine
//! - One active track per guild, decoded on a blocking worker
//! - Lifecycle events (`Started`, `Stuck`, `Errored`, `Ended`) on a channel
//!
//! ### [`scheduler`] - Track Scheduler
//! - FIFO queue in front of the engine
//! - Reacts to lifecycle events by advancing or vacating the channel
//!
//! ### [`session`] - Guild Sessions
//! - Engine, scheduler and frame provider bundled per guild
//! - Ordered load lane and idle detection for eviction
//!
//! ### [`provider`] - Frame Provider
//! - One-frame cache between the engine and songbird's pull-based transport
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Samples**: 32-bit float, little-endian
//! - **Channels**: Stereo (2 channels)
//! - **Frame**: 20ms (960 samples per channel)

pub mod decoder;
pub mod engine;
pub mod player;
pub mod provider;
pub mod queue;
pub mod scheduler;
pub mod session;
pub mod track;
