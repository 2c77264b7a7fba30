//! # Shadow Uplink Library
//!
//! Uploads locally buffered telemetry records to a device shadow whenever the
//! network is reachable, and stops cleanly when it is not.
//!
//! The [`supervisor`] polls a [`connectivity`] probe and owns at most one
//! [`worker`], which drains the [`queue`] directory through a [`channel`].

pub mod channel;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod queue;
pub mod supervisor;
pub mod worker;
