pub mod admittance;
pub mod network;

pub use admittance::{AdmittanceMatrices, BranchStamp, make_y_bus};
pub use network::{Branch, Bus, Generator, Network};
