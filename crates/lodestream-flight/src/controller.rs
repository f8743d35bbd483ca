use std::time::Instant;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, trace};

use crate::{
    sampler::{FrameSample, SampleRing},
    types::{FlightMode, FlightOptions},
};

/// Read side of the controller, consumed by the dispatcher.
///
/// Allows testing the dispatch loop with a mocked flight size.
#[cfg_attr(test, automock)]
pub trait FlightSource {
    /// Current budget for concurrently in-flight asset requests.
    fn flight_size(&self) -> usize;
}

/// What a sampling tick concluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Window grew along the cubic curve.
    Grew,
    /// Congestion event: window reduced multiplicatively.
    Congestion,
    /// Stall: no assets for the recent half of the timeout window.
    Stall,
}

/// CUBIC-style congestion window over asset throughput.
///
/// Driven once per sampling interval with the bytes/assets received during
/// that interval. Mutates only its own window state; the single output is
/// [`FlightSource::flight_size`]. All time comes in through explicit
/// `Instant` arguments, so tests never wait on real timers.
#[derive(Debug)]
pub struct FlightController {
    opts: FlightOptions,
    cwnd: f64,
    w_max: f64,
    mode: FlightMode,
    last_reduction: Option<Instant>,
    /// Frame snapshot taken at the last congestion event. Detection compares
    /// the newest frame against this exact frame, not a smoothed average —
    /// smoothing changes convergence behavior materially.
    frame_at_reduction: Option<FrameSample>,
    ring: SampleRing,
    fragment_estimate: f64,
    flight: usize,
}

impl FlightController {
    #[must_use]
    pub fn new(opts: FlightOptions) -> Self {
        let fragment_estimate = opts.initial_fragment_bytes;
        let flight = opts.default_flight.clamp(opts.min_flight, opts.max_flight);
        let cwnd = flight as f64 * fragment_estimate;
        Self {
            ring: SampleRing::new(opts.timeout_frames),
            opts,
            cwnd,
            w_max: cwnd,
            mode: FlightMode::MaxProbing,
            last_reduction: None,
            frame_at_reduction: None,
            fragment_estimate,
            flight,
        }
    }

    #[must_use]
    pub fn options(&self) -> &FlightOptions {
        &self.opts
    }

    #[must_use]
    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    #[must_use]
    pub fn mode(&self) -> FlightMode {
        self.mode
    }

    /// Feed one sampling interval's worth of arrivals.
    pub fn on_sample(&mut self, now: Instant, received_bytes: u64, received_count: u64) -> TickOutcome {
        if received_count > 0 {
            let observed = received_bytes as f64 / received_count as f64;
            self.fragment_estimate = 0.75 * self.fragment_estimate + 0.25 * observed;
        }

        let frame = FrameSample {
            received_bytes,
            received_count,
            fragment_estimate: self.fragment_estimate,
            cwnd_at_sample: self.cwnd,
        };
        self.ring.push(frame);

        if self.ring.recent_half_idle() {
            return self.on_stall(now);
        }

        // A silent interval only feeds stall tracking. Treating it as a
        // congestion event would clear the ring and push stall detection
        // out indefinitely.
        if received_count == 0 {
            self.flight = self.to_flight_size();
            return TickOutcome::Grew;
        }

        let outcome = if self.detect_congestion(&frame) {
            self.on_congestion(now, frame);
            TickOutcome::Congestion
        } else {
            self.grow(now);
            TickOutcome::Grew
        };

        // First frame doubles as the detection baseline.
        if self.frame_at_reduction.is_none() {
            self.frame_at_reduction = Some(frame);
            self.last_reduction.get_or_insert(now);
        }

        self.flight = self.to_flight_size();
        trace!(
            cwnd = self.cwnd,
            w_max = self.w_max,
            flight = self.flight,
            fragment = self.fragment_estimate,
            outcome = ?outcome,
            "flight sample"
        );
        outcome
    }

    /// Compare the newest frame's throughput increase against the increase
    /// the window growth since the last reduction would predict. Outside the
    /// deviation band, or an outright regression, counts as congestion.
    fn detect_congestion(&self, frame: &FrameSample) -> bool {
        let Some(reference) = self.frame_at_reduction else {
            return false;
        };
        if reference.received_bytes == 0 || reference.cwnd_at_sample <= 0.0 {
            return false;
        }

        let expected = frame.cwnd_at_sample / reference.cwnd_at_sample;
        let actual = frame.received_bytes as f64 / reference.received_bytes as f64;

        if actual < 1.0 && expected >= 1.0 {
            return true;
        }
        actual < expected * (1.0 - self.opts.deviation)
            || actual > expected * (1.0 + self.opts.deviation)
    }

    fn on_congestion(&mut self, now: Instant, frame: FrameSample) {
        let pre_event = self.cwnd;
        let (mode, multiplier) = if pre_event > self.w_max {
            (FlightMode::MaxProbing, self.opts.beta)
        } else {
            (FlightMode::FastConvergence, self.opts.fast_convergence)
        };
        self.mode = mode;
        self.w_max = pre_event;
        self.cwnd = self.w_max * multiplier;
        self.last_reduction = Some(now);
        self.frame_at_reduction = Some(frame);
        self.ring.clear();
        debug!(
            w_max = self.w_max,
            cwnd = self.cwnd,
            mode = ?self.mode,
            "congestion event"
        );
    }

    fn on_stall(&mut self, now: Instant) -> TickOutcome {
        let avg = self.ring.older_half_avg_cwnd().unwrap_or(self.cwnd);
        self.w_max = avg * self.opts.stall_reprobe;
        // Start at the cubic curve's t=0 point so growth resumes from the
        // pre-stall average and probes up past w_max once traffic returns.
        self.cwnd = self.w_max * self.opts.beta;
        self.mode = FlightMode::MaxProbing;
        self.last_reduction = Some(now);
        self.frame_at_reduction = None;
        self.ring.clear();
        self.flight = self.opts.default_flight.clamp(self.opts.min_flight, self.opts.max_flight);
        debug!(w_max = self.w_max, flight = self.flight, "stall detected, window reset");
        TickOutcome::Stall
    }

    /// Cubic growth: `cwnd = SCALING * (T - K)^3 + w_max` with
    /// `K = cbrt(w_max * (1 - BETA) / SCALING)`.
    fn grow(&mut self, now: Instant) {
        let Some(since) = self.last_reduction else {
            return;
        };
        let t = now.duration_since(since).as_secs_f64();
        let k = (self.w_max * (1.0 - self.opts.beta) / self.opts.scaling).cbrt();
        let target = self.opts.scaling * (t - k).powi(3) + self.w_max;

        let floor = self.opts.min_flight as f64 * self.fragment_estimate;
        let ceil = self.opts.max_flight as f64 * self.fragment_estimate;
        self.cwnd = target.clamp(floor, ceil);
    }

    fn to_flight_size(&self) -> usize {
        let raw = (self.cwnd / self.fragment_estimate).round() as i64;
        (raw.max(0) as usize).clamp(self.opts.min_flight, self.opts.max_flight)
    }
}

impl FlightSource for FlightController {
    fn flight_size(&self) -> usize {
        self.flight
    }
}
