pub mod host;
pub mod numa;
pub mod threads;
pub mod topology;

pub use host::{HostSnapshot, SystemProbe};
pub use threads::{ThreadInventory, ThreadRecord};
pub use topology::CpuTopology;
