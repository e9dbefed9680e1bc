//! Stock delegates for interactive viewing and topic-to-topic copy.

mod replicator;
mod viewer;

pub use replicator::{KafkaSink, RecordSink, Replicator};
pub use viewer::Viewer;
