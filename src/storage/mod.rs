/// Deep merge over nested JSON trees
pub mod merge;
/// The address store itself
pub mod store;

pub use merge::deep_merge;
pub use store::AddressStore;
