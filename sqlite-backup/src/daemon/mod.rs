//! Process lifecycle for the standalone daemon.

pub mod shutdown;

pub use shutdown::ShutdownCoordinator;
