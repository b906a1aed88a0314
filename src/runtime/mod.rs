//! Runtime system
//!
//! This module contains the two-lane scheduler, its suspension points,
//! cancellation and the fire-and-forget adapter.

pub mod cancel;
pub mod forget;
pub mod scheduler;
pub mod suspend;
pub mod timer;
