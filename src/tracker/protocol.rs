use thiserror::Error;

use crate::peer::PeerAddr;

/// Tracker messages are `/`-delimited text with a trailing delimiter, one
/// request and at most one response per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerRequest {
    /// `INIT/<host:port>/<contentId>/` — a peer announces it seeds the
    /// whole file.
    Init { peer: PeerAddr, content_id: String },
    /// `STARTED/<host:port>/<contentId>/` — a downloader's first seeder
    /// request; also registers it as a prospective seeder.
    Started { peer: PeerAddr, content_id: String },
    /// `NEEDY/<host:port>/<contentId>/` — subsequent seeder requests.
    Needy { peer: PeerAddr, content_id: String },
    /// `STOPPED/<host:port>/` — remove the endpoint from every entry. No
    /// response is sent.
    Stopped { peer: PeerAddr },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerResponse {
    /// `SUCCESS/`
    Success,
    /// `SEEDERS/<contentId>/<count>/<ep1>/.../`
    Seeders {
        content_id: String,
        seeders: Vec<PeerAddr>,
    },
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
}

fn tokens(buf: &[u8]) -> Result<Vec<&str>, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Empty);
    }
    let text = std::str::from_utf8(buf).map_err(|_| DecodeError::NotText)?;
    let trimmed = text.strip_suffix('/').unwrap_or(text);
    Ok(trimmed.split('/').collect())
}

fn parse_peer(token: &str) -> Result<PeerAddr, DecodeError> {
    token.parse().map_err(|_| DecodeError::InvalidField("peer"))
}

impl TrackerRequest {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Init { peer, content_id } => format!("INIT/{peer}/{content_id}/"),
            Self::Started { peer, content_id } => format!("STARTED/{peer}/{content_id}/"),
            Self::Needy { peer, content_id } => format!("NEEDY/{peer}/{content_id}/"),
            Self::Stopped { peer } => format!("STOPPED/{peer}/"),
        }
        .into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let tokens = tokens(buf)?;
        let with_id = |kind: fn(PeerAddr, String) -> Self| -> Result<Self, DecodeError> {
            if tokens.len() < 3 {
                return Err(DecodeError::Truncated);
            }
            if tokens[2].is_empty() {
                return Err(DecodeError::InvalidField("content id"));
            }
            Ok(kind(parse_peer(tokens[1])?, tokens[2].to_string()))
        };
        match *tokens.first().ok_or(DecodeError::Empty)? {
            "INIT" => with_id(|peer, content_id| Self::Init { peer, content_id }),
            "STARTED" => with_id(|peer, content_id| Self::Started { peer, content_id }),
            "NEEDY" => with_id(|peer, content_id| Self::Needy { peer, content_id }),
            "STOPPED" => {
                if tokens.len() < 2 {
                    return Err(DecodeError::Truncated);
                }
                Ok(Self::Stopped {
                    peer: parse_peer(tokens[1])?,
                })
            }
            _ => Err(DecodeError::UnknownToken),
        }
    }
}

impl TrackerResponse {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Success => "SUCCESS/".to_string(),
            Self::Seeders {
                content_id,
                seeders,
            } => {
                let mut out = format!("SEEDERS/{content_id}/{}/", seeders.len());
                for seeder in seeders {
                    out.push_str(&seeder.to_string());
                    out.push('/');
                }
                out
            }
        }
        .into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let tokens = tokens(buf)?;
        match *tokens.first().ok_or(DecodeError::Empty)? {
            "SUCCESS" => Ok(Self::Success),
            "SEEDERS" => {
                if tokens.len() < 3 {
                    return Err(DecodeError::Truncated);
                }
                let count: usize = tokens[2]
                    .parse()
                    .map_err(|_| DecodeError::InvalidField("count"))?;
                if tokens.len() < 3 + count {
                    return Err(DecodeError::Truncated);
                }
                let seeders = tokens[3..3 + count]
                    .iter()
                    .map(|t| parse_peer(t))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Seeders {
                    content_id: tokens[1].to_string(),
                    seeders,
                })
            }
            _ => Err(DecodeError::UnknownToken),
        }
    }
}
