// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The 20-byte content address (`H` in the spec) and the small set of
//! newtype ids built on top of it.

use std::fmt;

use blake2::Blake2b;
use blake2::Digest as _;
use blake2::digest::consts::U20;

/// A 20-byte content address. Equality is bytewise equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash([u8; 20]);

impl Hash {
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; Self::LEN];
        let n = bytes.len().min(Self::LEN);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn try_from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != Self::LEN {
            return None;
        }
        Some(Self::from_bytes(&bytes))
    }

    /// Hashes a canonical byte encoding of `value` into a new content address.
    ///
    /// Uses BLAKE2b truncated to 20 bytes rather than SHA-1: the spec only
    /// requires a fixed-width content address, not Git wire compatibility.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Blake2b::<U20>::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        Self::from_bytes(&digest)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.hex())
    }
}

/// A value that can be deterministically hashed into a [`Hash`].
///
/// Implementations must encode every field that affects identity, in a
/// stable order, so that two equal values always produce the same hash and
/// two unequal values are overwhelmingly unlikely to collide.
pub trait ContentHash {
    fn update_hash(&self, buf: &mut Vec<u8>);

    fn content_hash(&self) -> Hash {
        let mut buf = Vec::new();
        self.update_hash(&mut buf);
        Hash::of(&buf)
    }
}

impl ContentHash for str {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.as_bytes());
    }
}

impl ContentHash for String {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.as_str().update_hash(buf);
    }
}

impl ContentHash for Hash {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.0);
    }
}

impl<T: ContentHash> ContentHash for Option<T> {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        match self {
            None => buf.push(0),
            Some(v) => {
                buf.push(1);
                v.update_hash(buf);
            }
        }
    }
}

impl<T: ContentHash> ContentHash for [T] {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for item in self {
            item.update_hash(buf);
        }
    }
}

impl<T: ContentHash> ContentHash for Vec<T> {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.as_slice().update_hash(buf);
    }
}

/// Defines a newtype wrapper around [`Hash`] with `Debug`/`Display`/hex
/// conversions, analogous to this ecosystem's `id_type!` pattern.
macro_rules! hash_id {
    ($(#[$attr:meta])* $vis:vis $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        $vis struct $name($crate::hash::Hash);

        impl $name {
            pub fn new(hash: $crate::hash::Hash) -> Self {
                Self(hash)
            }

            pub fn hash(&self) -> $crate::hash::Hash {
                self.0
            }

            pub fn hex(&self) -> String {
                self.0.hex()
            }

            pub fn try_from_hex(s: &str) -> Option<Self> {
                $crate::hash::Hash::try_from_hex(s).map(Self)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0.hex()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(&self.0.hex())
            }
        }
    };
}

pub(crate) use hash_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bytes_hash_equal() {
        let a = Hash::of(b"hello");
        let b = Hash::of(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_hash_different() {
        let a = Hash::of(b"hello");
        let b = Hash::of(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trips() {
        let h = Hash::of(b"round-trip");
        let hex = h.hex();
        assert_eq!(Hash::try_from_hex(&hex), Some(h));
    }
}
