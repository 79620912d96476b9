//! Identifiers shared across the operator node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{COORDINATION_STREAM_SUFFIX, MAX_PARTITION_COUNT};
use crate::ProtocolError;

/// Identity of a network peer. Unique within a fleet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a logical stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The coordination stream of an operator's fleet.
    pub fn coordination_stream(operator: &Address) -> Self {
        Self(format!("{}{}", operator, COORDINATION_STREAM_SUFFIX))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A single partition of a stream: the unit of work assignment.
///
/// Ordered by stream id first, then partition index. The textual form is
/// `<stream>#<partition>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamPartId {
    pub stream_id: StreamId,
    pub partition: u32,
}

impl StreamPartId {
    pub fn new(stream_id: StreamId, partition: u32) -> Result<Self, ProtocolError> {
        ensure_valid_partition(partition)?;
        Ok(Self { stream_id, partition })
    }

    /// All partitions `0..partitions` of a stream.
    pub fn all_of(stream_id: &StreamId, partitions: u32) -> Vec<Self> {
        (0..partitions.min(MAX_PARTITION_COUNT))
            .map(|partition| Self { stream_id: stream_id.clone(), partition })
            .collect()
    }

    /// Key fed to the consistent hash ring.
    ///
    /// The partition index goes first: stream ids of the same owner often
    /// differ only in a short suffix and would otherwise cluster.
    pub fn ring_key(&self) -> String {
        format!("{}#{}", self.partition, self.stream_id)
    }
}

impl fmt::Display for StreamPartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.stream_id, self.partition)
    }
}

impl FromStr for StreamPartId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stream, partition) = s
            .rsplit_once('#')
            .ok_or_else(|| ProtocolError::InvalidStreamPart(s.to_string()))?;
        if stream.is_empty() {
            return Err(ProtocolError::InvalidStreamPart(s.to_string()));
        }
        let partition: u32 = partition
            .parse()
            .map_err(|_| ProtocolError::InvalidStreamPart(s.to_string()))?;
        Self::new(StreamId::new(stream), partition)
    }
}

pub fn ensure_valid_partition(partition: u32) -> Result<(), ProtocolError> {
    if partition >= MAX_PARTITION_COUNT {
        return Err(ProtocolError::InvalidStreamPart(format!(
            "partition {partition} exceeds maximum {}",
            MAX_PARTITION_COUNT - 1
        )));
    }
    Ok(())
}

/// On-chain address of an operator or sponsorship contract.
///
/// Always stored lowercase with a `0x` prefix and 20 bytes of hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let lower = raw.trim().to_ascii_lowercase();
        let body = lower
            .strip_prefix("0x")
            .ok_or_else(|| ProtocolError::InvalidAddress(raw.to_string()))?;
        let bytes = hex::decode(body).map_err(|_| ProtocolError::InvalidAddress(raw.to_string()))?;
        if bytes.len() != 20 {
            return Err(ProtocolError::InvalidAddress(raw.to_string()));
        }
        Ok(Self(lower))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// How to reach a peer node. Carried in heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

impl PeerDescriptor {
    pub fn new(node_id: NodeId) -> Self {
        Self { node_id, addresses: Vec::new() }
    }
}
