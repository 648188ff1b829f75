pub mod config;
pub mod init;
pub mod mismatch;
pub mod qlim;
pub mod result_extract;
pub mod systems;
pub mod prelude {
    pub use super::config::*;
    pub use super::init::{BusClassification, BusInjection, BusType, classify_buses};
    pub use super::qlim::{LimitSide, LimitViolation};
    pub use super::result_extract::*;
    pub use super::systems::*;
}
