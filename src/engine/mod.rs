mod assembler;
mod exporter;
mod service;
mod sweeper;
mod transient;

pub use assembler::{Assembler, Assembly, AssemblyState, UNHASHED};
pub use exporter::{Export, ResourceExporter, DOWNLOAD_FORBIDDEN_MESSAGE, DOWNLOAD_FORBIDDEN_STATUS};
pub use service::TestObjectService;
pub use sweeper::{spawn_sweeper, sweep_once, SweepSchedule, SweeperHandle};
pub use transient::TransientCache;
