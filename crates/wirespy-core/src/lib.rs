//! Core types and shared utilities for the wirespy ingestion pipeline.
//!
//! This crate provides:
//! - Producer-facing event records (peer sightings, block and transaction
//!   announcements, transaction bodies)
//! - Event kinds and the write policy each kind is ingested with
//! - The eth wire message-code table used for human-readable logs
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;
pub mod wire;

pub use error::{Error, Result};
pub use event::{
    BlockAnnouncement, Event, EventKind, PeerDisconnect, PeerHeartbeat, PeerHello, PeerSighting,
    Signature, TransactionAnnouncement, TransactionContent, WritePolicy,
};
pub use wire::{DisconnectReason, MessageCode};
