use log::info;

use crate::error::NodeError;
use crate::node::NodeRef;
use crate::proto::{data_field, Message};
use crate::threads::chord::ChordService;
use crate::utils::types::Address;

/// Runs the newcomer side of the join handshake against a bootstrap peer.
/// The listener must already be serving: the successor pushes the
/// newcomer's records via `BULK_INSERT` while `TRANSFER_KEYS` is in flight.
pub async fn process_node_join(service: &ChordService, bootstrap: &Address) -> Result<(), NodeError> {
    let own = service.node().clone();
    info!("Joining existing cluster via {}", bootstrap);

    let data = service
        .request_address_with_retry(bootstrap, Message::JoinRequest { new_node: own.clone() })
        .await?;
    let mode: String = data_field(&data, "mode")?;
    let successor: NodeRef = data_field(&data, "successor")?;

    if mode == "two_node_bootstrap" {
        // The bootstrap was alone and has already repointed to us.
        service.set_successor(successor.clone());
        service.set_predecessor(successor.clone());
        service
            .request_peer(&successor, Message::SetSuccessor { node: own.clone() })
            .await?;
        service
            .request_peer(&successor, Message::SetPredecessor { node: own.clone() })
            .await?;
        service
            .request_peer(&successor, Message::TransferKeys { new_node: own })
            .await?;
    } else {
        service.set_successor(successor.clone());
        let data = service
            .request_peer(&successor, Message::GetPredecessor)
            .await?;
        let predecessor: NodeRef = data_field(&data, "predecessor")?;
        service.set_predecessor(predecessor.clone());

        // The transfer interval is taken from the successor's predecessor
        // pointer, so the transfer must run before that pointer is updated.
        service
            .request_peer(&successor, Message::TransferKeys { new_node: own.clone() })
            .await?;
        service
            .request_peer(&successor, Message::SetPredecessor { node: own.clone() })
            .await?;
        service
            .request_peer(&predecessor, Message::SetSuccessor { node: own })
            .await?;
    }

    info!(
        "Joined the ring: successor is {}, predecessor is {}",
        service.successor(),
        service.predecessor()
    );
    Ok(())
}
