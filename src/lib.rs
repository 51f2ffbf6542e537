pub mod client;
pub mod config;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod utils;
pub mod wire;
pub mod workers;
