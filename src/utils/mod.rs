/// Utility modules shared by the ingestion pipeline
pub mod path_resolver;
pub mod size;
pub mod time;

/// Confines caller-influenced paths to a managed root.
pub use path_resolver::{sanitize_file_name, SecurePathResolver};

pub use size::human_readable_size;

pub use time::{Clock, ManualClock, SystemClock};
