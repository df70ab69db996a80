pub mod entities;
pub mod ports;
pub mod repositories;

pub use entities::*;
pub use ports::*;
pub use repositories::*;
pub use scheduler_core::{SchedulerError, SchedulerResult};
