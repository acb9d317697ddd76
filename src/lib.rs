//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map onto the individual workspace
//! crates (`core-service`, `core-playback`). Host applications can depend on
//! `voice-stream-workspace` and enable the documented features instead of
//! wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(any(feature = "playback-only", feature = "decoder-all"))]
pub use core_playback as playback;
