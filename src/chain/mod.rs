pub mod client;
pub mod types;

pub use client::{ChainDataService, HttpChainClient};
pub use types::*;
