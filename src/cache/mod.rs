pub mod debounce;
pub mod keys;
pub mod preview_cache;
pub mod round_store;
pub mod store;
