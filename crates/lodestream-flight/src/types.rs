use std::time::Duration;

/// Window mode after the most recent reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightMode {
    /// Window was at or below `w_max` when the event hit — converge faster.
    FastConvergence,
    /// Window had grown past `w_max` — probing for new capacity.
    MaxProbing,
}

/// Congestion-control configuration.
#[derive(Clone, Debug)]
pub struct FlightOptions {
    /// Cubic growth coefficient, in window-bytes per second cubed.
    pub scaling: f64,
    /// Multiplicative decrease factor used in max-probing mode.
    pub beta: f64,
    /// Steeper decrease factor used below `w_max`.
    pub fast_convergence: f64,
    /// Allowed relative deviation between expected and measured throughput
    /// growth before a congestion event is declared.
    pub deviation: f64,
    /// Fixed sampling cadence for the control loop.
    pub sample_interval: Duration,
    /// Number of frames in the stall-tracking window.
    pub timeout_frames: usize,
    /// Scale applied to the pre-stall averaged window when re-probing.
    pub stall_reprobe: f64,
    /// Lower clamp on the flight size.
    pub min_flight: usize,
    /// Upper clamp on the flight size.
    pub max_flight: usize,
    /// Flight size used before any samples exist and after a stall.
    pub default_flight: usize,
    /// Seed for the average asset byte-size estimate.
    pub initial_fragment_bytes: f64,
}

impl Default for FlightOptions {
    fn default() -> Self {
        Self {
            scaling: 2_000.0,
            beta: 0.8,
            fast_convergence: 0.7,
            deviation: 0.3,
            sample_interval: Duration::from_secs(1),
            timeout_frames: 10,
            stall_reprobe: 1.25,
            min_flight: 1_500,
            max_flight: 30_000,
            default_flight: 3_000,
            initial_fragment_bytes: 4_096.0,
        }
    }
}
