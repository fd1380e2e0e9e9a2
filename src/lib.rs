//! This crate exposes the internal functionality of the rdpsweep scanner.
//!
//! rdpsweep walks the IPv4 space from a start address, forever, probing a
//! configurable set of TCP ports on every host and recording the ones
//! that answer an RDP X.224 connection request. It is built for very wide
//! sweeps: tens of thousands of concurrent probes bounded by a fixed
//! worker pool rather than one thread per probe.
//!
//! ## Architecture Overview
//!
//! The scanning behaviour is managed by
//! [`ScanEngine`](crate::scanner::ScanEngine), which couples three
//! pieces:
//!
//! 1. **Address sweep**: [`AddressSweep`](crate::address::AddressSweep)
//!    yields an unbounded, deterministic address sequence.
//! 2. **Dispatch**: jobs enter a bounded queue sized to the worker count,
//!    so a slow pool throttles the infinite sweep instead of buffering it.
//! 3. **Probing**: each worker runs the [`Probe`](crate::probe::Probe)
//!    against its job and forwards hits to a bounded results channel with
//!    an explicit overflow policy.
//!
//! Results leave the engine as `address:port` strings in completion
//! order; the sink appends them to a file and echoes them to the console.
//!
//! ## Basic Usage Example
//!
//! ```no_run
//! use std::net::Ipv4Addr;
//! use std::time::Duration;
//!
//! use rdpsweep::input::OverflowPolicy;
//! use rdpsweep::probe::RdpProbe;
//! use rdpsweep::scanner::{EngineConfig, ScanEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = ScanEngine::new(
//!         RdpProbe::new(Duration::from_secs(3)),
//!         EngineConfig {
//!             workers: 512,
//!             result_buffer: 512,
//!             overflow: OverflowPolicy::Block,
//!         },
//!     );
//!
//!     let handle = engine.spawn(
//!         Ipv4Addr::new(10, 0, 0, 0),
//!         vec![3389],
//!         CancellationToken::new(),
//!     );
//!
//!     let results = handle.results();
//!     while let Some(line) = results.pop().await {
//!         println!("{line}");
//!     }
//! }
//! ```
//!
//! The probe is a heuristic, not a handshake validation: any TCP service
//! that replies with at least one byte inside the timeout is reported.
//! That matches the detection semantics this tool is specified to have.
#![warn(missing_docs)]
#![doc(html_root_url = "https://docs.rs/rdpsweep/0.3.0")]

pub mod address;

pub mod input;

pub mod probe;

pub mod scanner;

pub mod sink;

pub mod status;
