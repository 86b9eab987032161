//! Background threads: the lossy output publisher.

mod output_publisher;

pub use output_publisher::{OutputCallback, OutputPublisher, OutputSnapshot};
