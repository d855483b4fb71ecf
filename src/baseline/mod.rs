pub mod anomaly;
pub mod buffer;
pub mod engine;
pub mod notifier;

pub use anomaly::AnomalyDetector;
pub use buffer::{BaselineBuffers, Sample};
pub use engine::BaselineEngine;
pub use notifier::AlertNotifier;
