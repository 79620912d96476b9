use std::sync::Arc;
use std::time::Duration;

use opn_protocol::{
    schedule_at_interval, AbortSignal, Address, CoordinationChannel, CoordinationMessage,
    PeerDescriptor, StreamId,
};

use crate::FleetError;

/// Announce `me` on the coordination stream of `operator`.
pub async fn publish_heartbeat(
    channel: &dyn CoordinationChannel,
    operator: &Address,
    me: &PeerDescriptor,
) -> Result<(), FleetError> {
    let stream = StreamId::coordination_stream(operator);
    let payload = CoordinationMessage::heartbeat(me.clone()).encode()?;
    channel.publish(&stream, payload).await?;
    tracing::trace!(operator = %operator, node_id = %me.node_id, "Heartbeat published");
    Ok(())
}

/// Publish a heartbeat immediately and then every `interval` until aborted.
pub async fn run_heartbeat_loop(
    channel: Arc<dyn CoordinationChannel>,
    operator: Address,
    me: PeerDescriptor,
    interval: Duration,
    signal: AbortSignal,
) {
    schedule_at_interval(
        "heartbeat",
        || publish_heartbeat(channel.as_ref(), &operator, &me),
        interval,
        true,
        signal,
    )
    .await;
}
