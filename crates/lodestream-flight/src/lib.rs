#![forbid(unsafe_code)]

//! Adaptive congestion-control scheduler.
//!
//! Produces a single output — the *flight size*, the number of asset requests
//! allowed in flight concurrently — from throughput observed over fixed
//! sampling intervals. The control loop is CUBIC-shaped: cubic window growth
//! between congestion events, multiplicative decrease on an event, and a
//! stall detector that resets the loop when traffic dies entirely.
//!
//! The controller has no side channel into the dispatcher; everything it
//! decides flows through [`FlightSource::flight_size`].

mod controller;
mod sampler;
mod types;

pub use controller::{FlightController, FlightSource, TickOutcome};
pub use sampler::{FrameSample, SampleRing};
pub use types::{FlightMode, FlightOptions};
