pub mod command;
pub mod logger;
pub mod privilege;
