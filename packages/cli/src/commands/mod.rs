pub mod init;
pub mod simulate;

pub use init::{init, InitArgs};
pub use simulate::{simulate, SimulateArgs};
