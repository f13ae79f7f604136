/// FeedMerge Crypto Library
///
/// Platform OAuth tokens are stored encrypted with AES-256-GCM under a single
/// process-wide key, loaded once at startup and read-only afterwards.
/// The key is distributed out-of-band (environment configuration) and never
/// leaves the server.

pub mod cipher;
pub mod keys;

pub use cipher::TokenCipher;
