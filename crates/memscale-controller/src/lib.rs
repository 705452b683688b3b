//! memscale-controller — the control loop and shutdown state machine.
//!
//! A single task drives the sample → decide → reconcile → publish cycle
//! on a fixed interval, which serializes all roster mutation. Worker
//! exit events and external commands (manual scale, start/stop, OS
//! signals) are multiplexed into the same task via channels, so no
//! additional locking is needed around scaling decisions.
//!
//! External callers hold a cheap [`ControllerHandle`]; reads come from
//! the [`StatusBoard`], writes go through the command channel.

pub mod controller;
pub mod status;

pub use controller::{
    Controller, ControllerError, ControllerHandle, ScaleAck, ShutdownUrgency, StartReport,
};
pub use status::StatusBoard;
