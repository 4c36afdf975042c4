//! Retrace - HTTP traffic recorder/replayer middleware
//!
//! Sits in a proxy's request/response pipeline. While recording, upstream
//! exchanges are captured into named recordsets; while replaying, matching
//! requests are answered from a recordset with the original latency
//! reproduced at a configurable speed.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::field_reassign_with_default,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod logging;
pub mod matcher;
pub mod sink;
pub mod timing;

pub use config::{Config, ConfigHandle};
pub use engine::{Mode, RecordOutcome, ReplayEngine, RequestDisposition};
pub use error::{Result, RetraceError};
pub use exchange::{Exchange, InboundRequest, RequestKey, UpstreamResponse};
pub use matcher::{Matcher, RecordsetStore};
pub use sink::ResponseSink;
pub use timing::{Delivery, Speed, TimeFrame, TimingSimulator};
