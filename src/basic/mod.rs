pub(crate) mod dsbus_dv;
pub mod error;
pub(crate) mod lmpf;
pub(crate) mod newtonpf;
pub mod post_processing;
pub mod powerflow;
pub mod solver;
pub mod system;
