//! Session tokens and their wire encoding.

use std::fmt;
use std::str::FromStr;

/// Length of the encoded token in characters.
pub const TOKEN_LEN: usize = 64;

const RAW_LEN: usize = TOKEN_LEN / 2;

/// Identifies one session: `linear_index` + `worker_id` locate the slot, the
/// salts prove the holder saw this incarnation of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    pub salt: u64,
    pub linear_index: u32,
    pub worker_id: u32,
    pub app_session_id: u64,
    pub app_salt: u64,
}

impl SessionToken {
    /// Big-endian `salt | linear_index | worker_id | app_session_id | app_salt`.
    pub fn to_bytes(&self) -> [u8; RAW_LEN] {
        let mut raw = [0u8; RAW_LEN];
        raw[0..8].copy_from_slice(&self.salt.to_be_bytes());
        raw[8..12].copy_from_slice(&self.linear_index.to_be_bytes());
        raw[12..16].copy_from_slice(&self.worker_id.to_be_bytes());
        raw[16..24].copy_from_slice(&self.app_session_id.to_be_bytes());
        raw[24..32].copy_from_slice(&self.app_salt.to_be_bytes());
        raw
    }

    pub fn from_bytes(raw: &[u8; RAW_LEN]) -> Self {
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[at..at + 8]);
            u64::from_be_bytes(b)
        };
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&raw[at..at + 4]);
            u32::from_be_bytes(b)
        };
        Self {
            salt: u64_at(0),
            linear_index: u32_at(8),
            worker_id: u32_at(12),
            app_session_id: u64_at(16),
            app_salt: u64_at(24),
        }
    }

    /// Decode the URL/cookie form. Anything but 64 hex characters is `None`.
    pub fn decode(text: &[u8]) -> Option<Self> {
        if text.len() != TOKEN_LEN {
            return None;
        }
        let mut raw = [0u8; RAW_LEN];
        hex::decode_to_slice(text, &mut raw).ok()?;
        Some(Self::from_bytes(&raw))
    }

    pub fn encode(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SessionToken {
    type Err = InvalidToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s.as_bytes()).ok_or(InvalidToken)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed session token")]
pub struct InvalidToken;
