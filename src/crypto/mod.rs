//! Scanvault - Cryptographic Core
//!
//! Device-key and password-derived encryption regimes.

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod service;

pub use aead::*;
pub use kdf::*;
pub use keys::*;
pub use service::*;
