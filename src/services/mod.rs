pub mod log_reader;
pub mod runner;
pub mod session;
pub mod supervisor;
