//! Versioned list values
//!
//! `N.parentdir` and `N.openowner` hold a bincode-encoded
//! `(version, items)` pair so the layout can change without guessing.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{KvsnsError, Result};

pub const LIST_VERSION: u16 = 1;

pub fn encode_list<T: Serialize>(items: &[T]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&(LIST_VERSION, items))?)
}

pub fn decode_list<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>> {
    let (version, items): (u16, Vec<T>) = bincode::deserialize(bytes)?;
    if version != LIST_VERSION {
        return Err(KvsnsError::Corrupted(format!("Unsupported list version {}", version)));
    }
    Ok(items)
}
