//! Core library for the group shell multiplexer.
//!
//! Provides the engine (C1-C5: line-buffered pty I/O, the inline callback
//! registry, the remote dispatcher state machine, the dispatcher registry,
//! and the single-threaded poll-based event loop), configuration loading,
//! and structured logging. The CLI crate is a thin control-command surface
//! wired straight into `engine::EngineContext`.
//!
//! Quick start:
//! - Build an `engine::EngineContext` from a loaded `config::Config`.
//! - Call `EngineContext::add` per host, then drive `engine::EventLoop::step`
//!   in a loop until the engine is empty or a `:quit` is issued.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
