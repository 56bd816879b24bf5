pub mod handle;
pub mod state;

pub use handle::ProgressHandle;
pub use state::{ProgressReporter, ProgressState, ProgressStatus};
