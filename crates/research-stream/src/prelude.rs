//! Common imports for typical session usage.
//!
//! This module exports the types most callers need to build an engine, start
//! a session, and read its snapshots.
pub use crate::{
    BackendKind, Citation, Engine, EngineBuilder, EngineConfig, Phase, ResearchError,
    ResearchSession, SessionFailure, SessionSnapshot, SessionTicket, StartOptions, StreamEvent,
};
