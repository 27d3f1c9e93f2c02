//! Camera-guided picking of tissue cuboids from a petri dish into a
//! multi-well plate.
//!
//! # Architecture
//!
//! The picking procedure is a state machine in [`plans`] driving the
//! hardware collaborators defined in [`rig`]. Frames from the overview
//! camera flow through the pure vision pipeline in [`vision`], pixel
//! coordinates become robot coordinates through [`calibration`], and
//! [`scheduler`] decides which well each picked sample goes to.
//!
//! # Guidelines
//!
//! The code should pass clippy lints in pedantic mode. E.g. run from the
//! command line: `cargo clippy`. It's fine to suppress some lint locally
//! with `#[allow(clippy:<lint>)]` attribute.
//!
//! The code should be properly documented and should pass the
//! `#[warn(missing_docs)]` lint.

#![warn(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod annotate;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod consts;
pub mod logger;
pub mod plans;
pub mod rig;
pub mod scheduler;
pub mod vision;
