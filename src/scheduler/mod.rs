//! Task scheduling and the reconciliation loop

pub mod reconciler;
pub mod report;
pub mod session;
pub mod shutdown;
pub mod tasks;
pub mod window;

pub use reconciler::{breaker_trip, PassOutcome, ReconciliationLoop};
pub use report::{CycleOutcome, CycleReport, SideStatus};
pub use session::{Clock, CycleState, Eligibility, SessionState, SystemClock};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use tasks::{
    parse_tasks, FileTaskSource, GridTask, LoginTask, StaticTaskSource, Task, TaskSource,
    TaskStatus,
};
pub use window::TimeWindow;
