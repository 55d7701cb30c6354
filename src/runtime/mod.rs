pub mod bus_worker;

pub use crate::shared::errors::RuntimeError;
pub use bus_worker::{drive, run_bus_loop, BusHandle, ResultSink};
