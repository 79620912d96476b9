use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_PARTITION_COUNT;
use crate::ids::{Address, PeerDescriptor};
use crate::ProtocolError;

/// Messages published on an operator's coordination stream.
///
/// Encoded as a JSON object discriminated by `msgType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msgType")]
pub enum CoordinationMessage {
    #[serde(rename = "heartbeat")]
    Heartbeat(PeerDescriptor),
}

impl CoordinationMessage {
    pub fn heartbeat(peer: PeerDescriptor) -> Self {
        Self::Heartbeat(peer)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(|e| ProtocolError::MalformedMessage(e.to_string()))
    }
}

/// Stake change of the local operator in a sponsorship, as seen on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StakeEvent {
    Staked { sponsorship: Address, block_number: u64 },
    Unstaked { sponsorship: Address, block_number: u64 },
}

impl StakeEvent {
    pub fn sponsorship(&self) -> &Address {
        match self {
            Self::Staked { sponsorship, .. } | Self::Unstaked { sponsorship, .. } => sponsorship,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Staked { block_number, .. } | Self::Unstaked { block_number, .. } => *block_number,
        }
    }
}

/// Window during which votes on a flag are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl VotingPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }
}

/// A flag raised against a third party that this operator was selected to review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub sponsorship: Address,
    pub target_operator: Address,
    pub voting_period: VotingPeriod,
    /// Raw flag metadata, expected to be `{"partition": n}`.
    #[serde(default)]
    pub metadata: Option<String>,
}

impl ReviewRequest {
    pub fn partition(&self) -> Result<u32, ProtocolError> {
        parse_partition_from_metadata(self.metadata.as_deref())
    }
}

/// Metadata attached to a flag transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMetadata {
    pub partition: u32,
}

impl FlagMetadata {
    pub fn to_json(&self) -> String {
        serde_json::json!({ "partition": self.partition }).to_string()
    }
}

/// Extract and validate the partition index from flag metadata.
pub fn parse_partition_from_metadata(metadata: Option<&str>) -> Result<u32, ProtocolError> {
    let raw = metadata.ok_or_else(|| ProtocolError::Metadata("no metadata".into()))?;
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| ProtocolError::Metadata("malformed metadata".into()))?;
    let partition = value
        .get("partition")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| ProtocolError::Metadata("invalid or missing \"partition\" field".into()))?;
    if partition >= u64::from(MAX_PARTITION_COUNT) {
        return Err(ProtocolError::Metadata("invalid partition numbering".into()));
    }
    Ok(partition as u32)
}
