//! Exposure synchronization controller for externally triggered camera
//! arrays.
//!
//! All cameras in a synchronized group expose on the same hardware trigger
//! pulse. One camera (the master) runs closed-loop auto-exposure against a
//! brightness target; the others (followers) mirror its exposure/gain
//! decisions so frames captured at the same pulse share consistent
//! brightness. Every output frame carries its exposure metadata so consumers
//! can correlate frames across cameras.

pub mod brightness;
pub mod camera;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod mock;
pub mod solver;
