//! Core library for Runloom
//!
//! This crate contains the building blocks shared by every run:
//! - Abort signals
//! - The hierarchical event emitter
//! - Messages, chat/embedding model I/O and output aggregation
//! - Provider, tool and memory interfaces

pub mod backend;
pub mod emitter;
pub mod error;
pub mod memory;
pub mod message;
pub mod signal;
pub mod testing;
pub mod tool;

pub use emitter::{Creator, Emitter, EmitterOptions, EventMeta, EventPayload, Matcher, Subscription};
pub use error::{Error, ErrorKind};
pub use signal::AbortSignal;

pub type Result<T> = std::result::Result<T, Error>;
