use thiserror::Error;

use crate::peer::PeerAddr;

/// Tokens are `/`-delimited with a trailing delimiter; a `HAZ` response is
/// the only message carrying raw bytes, appended directly after its header.
/// One request and one response travel per connection: the writer sends its
/// message and shuts down its write half, the reader consumes to EOF.
const DELIM: char = '/';

/// Request for one segment, downloader to peer:
/// `CANHAZ/<requesterHost:port>/<fileName>/<segmentIndex>/<expectedHash>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRequest {
    /// Who is asking; informational only, the reply goes over the same
    /// connection.
    pub requester: PeerAddr,
    pub file_name: String,
    pub segment_index: u32,
    pub expected_hash: String,
}

/// Reply from the peer holding (or not holding) the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentResponse {
    /// `BUSY/` — peer declines to serve right now.
    Busy,
    /// `HAZNOT/<fileName>/<segmentIndex>/<expectedHash>/` — segment not held.
    NotFound {
        file_name: String,
        segment_index: u32,
        expected_hash: String,
    },
    /// `HAZ/<hash>/START/` + raw payload. `hash` is the digest of the bytes
    /// the peer actually read; the payload length is implied by the segment
    /// geometry, not framed.
    Data { hash: String, payload: Vec<u8> },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,

    #[error("unknown leading token")]
    UnknownToken,

    #[error("message truncated")]
    Truncated,

    #[error("invalid {0} field")]
    InvalidField(&'static str),

    #[error("message is not text")]
    NotText,

    #[error("hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("missing START marker")]
    MissingStart,
}

/// The protocol's loose hash equality: a match holds when either side's
/// token contains the other. Empty tokens never match.
fn hash_matches(expected: &str, got: &str) -> bool {
    !expected.is_empty() && !got.is_empty() && (got.contains(expected) || expected.contains(got))
}

/// Splits a textual message into its tokens, dropping the empty token the
/// trailing delimiter produces.
fn tokens(text: &str) -> Vec<&str> {
    let trimmed = text.strip_suffix(DELIM).unwrap_or(text);
    trimmed.split(DELIM).collect()
}

impl SegmentRequest {
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "CANHAZ/{}/{}/{}/{}/",
            self.requester, self.file_name, self.segment_index, self.expected_hash
        )
        .into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::Empty);
        }
        let text = std::str::from_utf8(buf).map_err(|_| DecodeError::NotText)?;
        let tokens = tokens(text);
        if tokens.first() != Some(&"CANHAZ") {
            return Err(DecodeError::UnknownToken);
        }
        if tokens.len() < 5 {
            return Err(DecodeError::Truncated);
        }
        let requester: PeerAddr = tokens[1]
            .parse()
            .map_err(|_| DecodeError::InvalidField("requester"))?;
        let segment_index: u32 = tokens[3]
            .parse()
            .map_err(|_| DecodeError::InvalidField("segment index"))?;
        if tokens[2].is_empty() || tokens[4].is_empty() {
            return Err(DecodeError::Truncated);
        }
        Ok(Self {
            requester,
            file_name: tokens[2].to_string(),
            segment_index,
            expected_hash: tokens[4].to_string(),
        })
    }
}

impl SegmentResponse {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Busy => b"BUSY/".to_vec(),
            Self::NotFound {
                file_name,
                segment_index,
                expected_hash,
            } => format!("HAZNOT/{file_name}/{segment_index}/{expected_hash}/").into_bytes(),
            Self::Data { hash, payload } => {
                let mut buf = format!("HAZ/{hash}/START/").into_bytes();
                buf.extend_from_slice(payload);
                buf
            }
        }
    }

    /// Decodes a response on the requester side. `expected_hash` is the
    /// descriptor's hash for the requested segment; a `HAZ` header whose
    /// hash token fails the loose-equality check is rejected here. Payload
    /// length and content verification stay with the caller — a response
    /// that passes this header check but carries bad bytes is a
    /// verification failure, not a protocol error.
    pub fn decode(buf: &[u8], expected_hash: &str) -> Result<Self, DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::Empty);
        }
        // HAZNOT shares the HAZ prefix, so it is matched first
        if buf.starts_with(b"HAZNOT/") {
            let text = std::str::from_utf8(buf).map_err(|_| DecodeError::NotText)?;
            let tokens = tokens(text);
            if tokens.len() < 4 {
                return Err(DecodeError::Truncated);
            }
            let segment_index: u32 = tokens[2]
                .parse()
                .map_err(|_| DecodeError::InvalidField("segment index"))?;
            return Ok(Self::NotFound {
                file_name: tokens[1].to_string(),
                segment_index,
                expected_hash: tokens[3].to_string(),
            });
        }
        if buf.starts_with(b"HAZ/") {
            let rest = &buf[4..];
            let slash = rest
                .iter()
                .position(|&b| b == DELIM as u8)
                .ok_or(DecodeError::Truncated)?;
            let hash = std::str::from_utf8(&rest[..slash]).map_err(|_| DecodeError::NotText)?;
            if !hash_matches(expected_hash, hash) {
                return Err(DecodeError::HashMismatch {
                    expected: expected_hash.to_string(),
                    got: hash.to_string(),
                });
            }
            let after = &rest[slash + 1..];
            let payload = after
                .strip_prefix(b"START/")
                .ok_or(DecodeError::MissingStart)?;
            return Ok(Self::Data {
                hash: hash.to_string(),
                payload: payload.to_vec(),
            });
        }
        if buf.starts_with(b"BUSY") {
            return Ok(Self::Busy);
        }
        Err(DecodeError::UnknownToken)
    }
}
