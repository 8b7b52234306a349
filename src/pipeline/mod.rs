//! Post pipeline.
//!
//! Every inbound event flows through:
//! 1. `IngestDispatcher::dispatch()` — grouped events go to the coalescer,
//!    ungrouped ones straight to the pipeline
//! 2. `GroupCoalescer::observe()` — debounces a burst until its quiet window passes
//! 3. `PostPipeline::process()` — fetch attachments, compose, deliver, clean up

pub mod coalescer;
pub mod composer;
pub mod dispatch;
pub mod processor;
pub mod types;

pub use coalescer::GroupCoalescer;
pub use dispatch::{Dispatched, IngestDispatcher};
pub use processor::PostPipeline;
