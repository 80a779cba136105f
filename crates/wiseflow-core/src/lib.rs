//! Shared foundations for the wiseflow ingestion engine.
//!
//! This crate has no opinions about scheduling or transport — it only
//! defines the vocabulary every other crate in the workspace builds on:
//! the normalized [`item::DataItem`] record, the engine-wide
//! [`error::EngineError`] taxonomy, the monotonic clock and resource
//! sampler (C1), the fire-and-forget event bus (C13), and the narrow
//! collaborator traits (`Store`, `HTMLFetcher`) that let the core stay
//! ignorant of persistence and rendering concerns.

pub mod clock;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod item;
pub mod resource;

pub use error::EngineError;
pub use item::DataItem;
