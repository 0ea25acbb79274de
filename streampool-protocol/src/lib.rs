//! Shared data model for the streampool endpoint pool.
//!
//! This crate defines the values that cross the daemon's boundaries:
//!
//! - [`IngestRecord`]: a candidate endpoint delivered by the ingestion side
//! - [`SnapshotEntry`]: a routable endpoint published to the routing layer
//! - [`ProbeResult`], [`Resolution`], [`Codec`]: per-cycle measurements
//! - [`EndpointState`], [`Reputation`]: per-endpoint health bookkeeping
//!
//! ```rust
//! use streampool_protocol::{Codec, IngestRecord, Resolution};
//!
//! let record = IngestRecord::new("cctv1", "http://example.com/live.m3u8", 1);
//! assert!(record.validate().is_ok());
//!
//! assert_eq!(Codec::from_name("hevc"), Codec::Hevc);
//! assert_eq!(Resolution::from(Some(1080)).to_string(), "1080p");
//! ```

pub mod error;
pub mod types;

pub use error::{ProtocolError, RouteError};
pub use types::{
    ChannelView, Codec, CycleKind, EndpointState, IngestRecord, ProbeResult, Reputation,
    Resolution, SnapshotEntry, ACCEPTED_SCHEMES,
};
