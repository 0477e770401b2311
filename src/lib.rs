pub mod api;
pub mod cache;
pub mod chat;
pub mod config;
pub mod delivery;
pub mod device;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod playback;
pub mod synthesizer;

#[cfg(test)]
pub(crate) mod test_support;
