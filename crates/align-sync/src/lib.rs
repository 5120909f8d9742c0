//! Client-side session synchronization for the drive alignment tester.
//!
//! The backend owns the alignment session. This crate keeps a local copy of it
//! coherent from two sources: partial state fragments pushed over a websocket
//! and full snapshots fetched by polling. Operator commands and mode switches
//! go through the same [`hub`] so every reader sees one consistent
//! [`store::SessionView`].

pub mod backend;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod fragment;
pub mod hub;
pub mod keys;
pub mod mode_switch;
pub mod model;
pub mod persist;
pub mod poll;
pub mod position;
pub mod push;
pub mod readings;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testing;

pub use backend::{Backend, FormatInfo, HttpBackend, SettingsUpdate};
pub use client::{AlignClient, Controls};
pub use config::ClientConfig;
pub use dispatch::{Command, Dispatched, Dispatcher};
pub use error::{PersistError, SyncError, SyncResult};
pub use event::{ManualEvent, ManualEventKind, PushEvent};
pub use fragment::{Patch, SessionState, StateFragment};
pub use keys::{route_key, Focus};
pub use mode_switch::{ModeSwitch, SwitchOutcome, TransitionReport};
pub use model::{Mode, Position, Quality, Reading, ReadingTiming, SharedConfig, SubMode, SubModeConfig};
pub use push::{ChannelStatus, Connector, PushChannel};
pub use store::SessionView;
