pub mod session;
pub mod sync;
pub mod types;

pub use session::{Session, SessionConfig};
pub use types::*;
