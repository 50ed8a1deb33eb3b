mod estimator;
mod speed;

pub use estimator::{ProgressEstimator, ProgressState, DEFAULT_THROTTLE};
pub use speed::{SlidingWindowSpeed, SpeedSample, DEFAULT_WINDOW};
