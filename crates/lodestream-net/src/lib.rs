#![forbid(unsafe_code)]

//! # lodestream-net
//!
//! Socket-pool transport for batched asset requests: long-lived duplex
//! connections with an authorization handshake, water-fill load balancing,
//! exponential-backoff reconnection, and a per-asset HTTP fallback once the
//! pool is exhausted.

mod balance;
mod connection;
mod error;
mod fetch;
mod pool;
mod retry;
mod types;
pub mod wire;

pub use crate::{
    connection::ConnectionState,
    error::{NetError, NetResult},
    fetch::{Fetch, HttpFetch},
    pool::SocketPool,
    retry::RetryFetch,
    types::{PoolOptions, RetryPolicy},
    wire::{AuthContext, RequestBatch, ResponseBody, ResponseItem},
};
