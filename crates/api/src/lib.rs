#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod bot;
mod interaction;

pub use bot::Bot;
pub use db;
pub use ed25519_dalek::VerifyingKey;
pub use interaction::try_respond;
