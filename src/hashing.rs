use sha1::{Digest, Sha1};

/// Length in characters of a hex-encoded segment digest.
pub const DIGEST_LEN: usize = 40;

/// Computes the lowercase hex SHA-1 digest of `data`.
///
/// The result is stable across runs and never contains `/`, so it can be
/// embedded directly in the slash-delimited wire protocols.
pub fn digest(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}
