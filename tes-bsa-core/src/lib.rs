pub mod bsa;
pub mod compression;
pub mod error;
pub mod extract;
pub mod hash;
pub mod pack;
pub mod read;
pub mod source;
pub mod write;

mod layout;
mod serde_util;
