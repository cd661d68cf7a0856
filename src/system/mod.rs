pub mod config_init;
pub mod service;
pub mod sysctl;
