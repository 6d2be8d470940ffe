//! Hardware-independent core of the Spectra 6 picture frame firmware.
//!
//! Everything in here builds for the host: the panel driver is written against
//! `embedded-hal` traits, and the wake cycle talks to the network, battery and
//! clock through the collaborator traits in [`wake`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod framebuffer;
pub mod freshness;
pub mod http;
pub mod panel;
pub mod portal;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod wake;

pub use config::{ConfigStore, DeviceConfig};
pub use framebuffer::{Framebuffer, PanelFrame};
pub use panel::{Color, Panel, Spectra6};
pub use state::RetainedState;
pub use wake::{CycleOutcome, WakeCycle};
