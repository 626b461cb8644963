//! crashrepro core library: crash reproduction engine shared by the CLI and its tests.

#[path = "runtime/clock.rs"]
mod clock;
#[path = "platform/config.rs"]
mod config;
#[path = "runtime/convergence.rs"]
mod convergence;
#[path = "runtime/display.rs"]
mod display;
#[path = "platform/duration.rs"]
mod duration;
#[path = "platform/envinfo.rs"]
mod envinfo;
#[path = "platform/error.rs"]
mod error;
#[path = "runtime/gestures.rs"]
mod gestures;
#[path = "model/jobs.rs"]
mod jobs;
#[path = "runtime/process.rs"]
mod process;
#[path = "runtime/proctree.rs"]
mod proctree;
#[path = "model/reporting.rs"]
mod reporting;
#[path = "cmd/reproduce.rs"]
mod reproduce;
#[path = "runtime/reproducer.rs"]
mod reproducer;
#[path = "platform/resources.rs"]
mod resources;
#[path = "runtime/sanitizer.rs"]
mod sanitizer;
#[path = "model/signature.rs"]
mod signature;
#[path = "runtime/signature_service.rs"]
mod signature_service;
#[path = "model/testcase.rs"]
mod testcase;

pub use clock::*;
pub use config::*;
pub use convergence::*;
pub use display::*;
pub use duration::*;
pub use envinfo::*;
pub use error::*;
pub use gestures::*;
pub use jobs::*;
pub use process::*;
pub use proctree::*;
pub use reporting::*;
pub use reproduce::*;
pub use reproducer::*;
pub use resources::*;
pub use sanitizer::*;
pub use signature::*;
pub use signature_service::*;
pub use testcase::*;
