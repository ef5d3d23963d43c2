use md5::{Digest, Md5};

/// A position on the hash line: the MD5 digest read as an unsigned big-endian integer.
pub type HashValue = u128;

pub const MIN_HASH: HashValue = 0;
pub const MAX_HASH: HashValue = u128::MAX;

/// Hashes a UTF-8 string (a data key, or `"ip:port"` for node identities).
pub fn hash_key(data: &str) -> HashValue {
    let digest = Md5::digest(data.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    u128::from_be_bytes(bytes)
}
