/// Events emitted by the transport layer.
#[derive(Clone, Debug)]
pub enum NetEvent {
    /// A socket finished its handshake and is ready for batches.
    ConnectionOpen { endpoint: String },
    /// A socket closed, gracefully or not.
    ConnectionClosed { endpoint: String, graceful: bool },
    /// Every socket endpoint failed; per-asset HTTP fallback is active.
    FallbackActivated,
    /// The congestion controller saw no traffic over the recent window.
    StallDetected,
    /// The congestion controller resized the in-flight request window.
    FlightResized { flight_size: usize },
}
