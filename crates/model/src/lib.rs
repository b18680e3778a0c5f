#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod question;
pub mod setting;

pub use question::{Question, RawQuestion};
pub use setting::Settings;
