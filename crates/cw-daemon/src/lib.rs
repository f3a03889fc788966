pub mod supervisor;

pub use supervisor::{CycleReport, Supervisor};
