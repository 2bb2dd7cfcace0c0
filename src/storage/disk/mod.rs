mod disk_manager;
mod disk_scheduler;
mod free_space;

pub use disk_manager::DiskManager;
pub use disk_scheduler::{DiskRequest, DiskScheduler};
pub use free_space::FreeSpaceManager;
