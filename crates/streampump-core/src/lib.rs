//! Core types shared between the checkpoint store and the event processor.
//!
//! This crate deliberately stays small: it holds the record type delivered to
//! user code ([`EventData`]) and the position types that describe where a
//! partition read begins ([`EventPosition`], [`StartPositions`]). Everything
//! stateful lives in `streampump-checkpoint` and `streampump-processor`.

pub mod event;
pub mod position;

pub use event::EventData;
pub use position::{EventPosition, StartPositions};
