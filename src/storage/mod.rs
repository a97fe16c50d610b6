pub mod cache;
pub mod persisted;
pub mod piggyback;

pub use cache::{CacheOptions, CacheStore};
pub use persisted::PersistedStore;
pub use piggyback::PiggybackStore;
