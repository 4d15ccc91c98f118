pub mod agent;
pub mod logging;
