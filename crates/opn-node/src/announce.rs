//! Publishing the node's descriptor on the operator contract.
//!
//! The contract keeps the last heartbeat of the operator, which other
//! operators use to reach the fleet. Only the fleet leader writes it, and
//! only when the stored one is older than the write interval.

use std::time::Duration;

use chrono::Utc;
use opn_protocol::{Address, ChainFacade, PeerDescriptor, ProtocolError};

/// Returns `true` when a new heartbeat was written.
pub async fn announce_node_to_contract(
    chain: &dyn ChainFacade,
    operator: &Address,
    me: &PeerDescriptor,
    write_interval: Duration,
) -> Result<bool, ProtocolError> {
    let last = chain.last_heartbeat_timestamp(operator).await?;
    let stale = match last {
        None => true,
        Some(at) => (Utc::now() - at).to_std().map_or(false, |age| age >= write_interval),
    };
    if !stale {
        tracing::debug!(operator = %operator, "On-chain heartbeat still fresh");
        return Ok(false);
    }

    chain.write_heartbeat(operator, me).await?;
    tracing::info!(operator = %operator, node_id = %me.node_id, "Wrote heartbeat to operator contract");
    Ok(true)
}
