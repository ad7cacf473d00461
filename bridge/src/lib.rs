//! Host-side bridge to a network offload coprocessor.
//!
//! Brings the coprocessor out of reset, runs the shared-memory descriptor
//! rings to and from it, and dispatches the typed control messages of each
//! logical feature. See [`Coprocessor`] for the probe/poll/remove entry
//! points.
#![no_std]

extern crate alloc;

pub mod coprocessor;
pub mod dispatch;
pub mod feature;
pub mod hal;
pub mod msg;
pub mod netdev;
pub mod queue;
pub mod stats;

#[cfg(any(test, feature = "mock"))]
pub mod mock;


pub use coprocessor::Coprocessor;
pub use dispatch::{DispatchCore, DispatchError, Request, TxError};
pub use hal::{CommonInit, Context, InitError, LifecycleState, Platform, PlatformConfig};
pub use queue::{QueueError, TransportQueue};
