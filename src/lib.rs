//! AC power flow on per-unit bus/branch networks.
//!
//! Build a [`Network`](prelude::Network), pick a
//! [`PowerFlowConfig`](prelude::PowerFlowConfig) and call
//! [`RunPF::run_pf`](prelude::RunPF::run_pf).
mod basic;
pub mod io;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use basic::error::*;
    pub use basic::post_processing::PostProcessing;
    pub use basic::powerflow::prelude::*;
    pub use basic::solver::*;
    pub use basic::system::*;
}
