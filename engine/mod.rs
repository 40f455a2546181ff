// Engine module: dedicated-thread loop primitive, per-connection workers,
// and the accept/retire control loop
pub mod registry;
pub mod runloop;
pub mod worker;

pub use registry::*;
pub use runloop::*;
pub use worker::*;
