pub mod aggregator;
pub mod store;

pub use aggregator::ScreenStateAggregator;
pub use store::{JpegScreenshotStore, MemoryScreenshotStore, ScreenshotStore};
