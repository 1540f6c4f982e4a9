//! Claim engine: taking over entries other consumers left behind.
//!
//! Two kinds of entries can be claimed. Stale entries belong to a peer that
//! has not touched them for at least the minimum idle time, usually because it
//! crashed. Released entries were parked on the placeholder owner by a
//! consumer that gave them up, and any consumer may take them at once.
//!
//! A steal cycle claims from at most one peer. A slow but live peer therefore
//! loses only part of its backlog per cycle.

use crate::entry::Entry;
use crate::errors::StoreResult;
use crate::plan::ConsumerPlan;
use crate::store::{LogStore, PendingConsumer};
use crate::types::{ConsumerName, EntryId};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Claims up to `count` stale entries of the first peer that has any.
///
/// Peers are taken in the order the store reports them. This consumer is
/// never a steal source. Entries owned by the placeholder are eligible
/// regardless of idle time.
#[instrument(
    skip(store, plan),
    fields(stream = %plan.stream(), group = %plan.group(), consumer = %plan.consumer())
)]
pub async fn steal_stale(
    store: &dyn LogStore,
    plan: &ConsumerPlan,
    min_idle: Duration,
    count: usize,
) -> StoreResult<Vec<Entry>> {
    let peers = store.pending_summary(plan.stream(), plan.group()).await?;

    for peer in peers
        .iter()
        .filter(|peer| &peer.consumer != plan.consumer())
    {
        let threshold = if peer.consumer.is_placeholder() {
            Duration::ZERO
        } else {
            min_idle
        };

        let eligible = eligible_ids(store, plan, peer, threshold, count).await?;
        if eligible.is_empty() {
            continue;
        }

        let claimed = store
            .claim(plan.stream(), plan.group(), plan.consumer(), threshold, &eligible)
            .await?;
        info!(
            peer = %peer.consumer,
            eligible = eligible.len(),
            claimed = claimed.len(),
            "claimed stale entries from peer"
        );
        return Ok(claimed);
    }

    debug!(peers = peers.len(), "no stale entries to claim");
    Ok(Vec::new())
}

/// Claims entries parked on the placeholder owner, oldest first.
#[instrument(skip(store, plan), fields(stream = %plan.stream(), consumer = %plan.consumer()))]
pub async fn reclaim_released(
    store: &dyn LogStore,
    plan: &ConsumerPlan,
    count: usize,
) -> StoreResult<Vec<Entry>> {
    let placeholder = ConsumerName::placeholder();
    let parked = store
        .pending_detail(
            plan.stream(),
            plan.group(),
            &placeholder,
            (EntryId::MIN, EntryId::MAX),
            count,
        )
        .await?;
    if parked.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<EntryId> = parked.iter().map(|pending| pending.id).collect();
    let claimed = store
        .claim(plan.stream(), plan.group(), plan.consumer(), Duration::ZERO, &ids)
        .await?;
    debug!(claimed = claimed.len(), "reclaimed released entries");
    Ok(claimed)
}

async fn eligible_ids(
    store: &dyn LogStore,
    plan: &ConsumerPlan,
    peer: &PendingConsumer,
    min_idle: Duration,
    count: usize,
) -> StoreResult<Vec<EntryId>> {
    let pending = store
        .pending_detail(
            plan.stream(),
            plan.group(),
            &peer.consumer,
            (peer.lowest, peer.highest),
            count,
        )
        .await?;

    Ok(pending
        .into_iter()
        .filter(|entry| entry.idle >= min_idle)
        .map(|entry| entry.id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, ScriptedStore};
    use crate::types::{ConsumerGroup, StreamUri};

    const MIN_IDLE: Duration = Duration::from_secs(10);

    fn plan() -> ConsumerPlan {
        ConsumerPlan::new(
            StreamUri::try_new("orders").unwrap(),
            ConsumerGroup::try_new("billing").unwrap(),
            ConsumerName::try_new("me").unwrap(),
        )
    }

    fn claims(store: &ScriptedStore) -> Vec<Call> {
        store
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Claim { .. }))
            .collect()
    }

    #[tokio::test]
    async fn never_steals_from_itself() {
        // Given: only this consumer has stale pending entries
        let store = ScriptedStore::default();
        store.pending_for("me", &[(1, Duration::from_secs(60))]);

        // When
        let stolen = steal_stale(&store, &plan(), MIN_IDLE, 16).await.unwrap();

        // Then
        assert!(stolen.is_empty());
        assert!(!store.calls().contains(&Call::PendingDetail("me".into())));
        assert!(claims(&store).is_empty());
    }

    #[tokio::test]
    async fn only_entries_idle_long_enough_are_stolen() {
        let store = ScriptedStore::default();
        store.pending_for(
            "peer",
            &[
                (1, Duration::from_secs(30)),
                (2, Duration::from_secs(1)),
                (3, MIN_IDLE),
            ],
        );

        let stolen = steal_stale(&store, &plan(), MIN_IDLE, 16).await.unwrap();

        let ids: Vec<EntryId> = stolen.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![EntryId::new(1, 0), EntryId::new(3, 0)]);
        assert_eq!(
            claims(&store),
            vec![Call::Claim {
                owner: "me".into(),
                min_idle: MIN_IDLE,
                ids: ids.clone(),
            }]
        );
    }

    #[tokio::test]
    async fn claims_from_one_peer_per_cycle() {
        // Given: two peers with stale entries, the first with only fresh ones
        let store = ScriptedStore::default();
        store.pending_for("busy", &[(1, Duration::from_secs(1))]);
        store.pending_for("crashed", &[(2, Duration::from_secs(60))]);
        store.pending_for("also-crashed", &[(3, Duration::from_secs(60))]);

        // When
        let stolen = steal_stale(&store, &plan(), MIN_IDLE, 16).await.unwrap();

        // Then
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].id, EntryId::new(2, 0));
        assert_eq!(claims(&store).len(), 1);
        assert!(!store
            .calls()
            .contains(&Call::PendingDetail("also-crashed".into())));
    }

    #[tokio::test]
    async fn placeholder_entries_are_eligible_at_any_idle() {
        let store = ScriptedStore::default();
        store.pending_for("none", &[(4, Duration::ZERO)]);

        let stolen = steal_stale(&store, &plan(), MIN_IDLE, 16).await.unwrap();

        assert_eq!(stolen.len(), 1);
        assert_eq!(
            claims(&store),
            vec![Call::Claim {
                owner: "me".into(),
                min_idle: Duration::ZERO,
                ids: vec![EntryId::new(4, 0)],
            }]
        );
    }

    #[tokio::test]
    async fn steals_no_more_than_requested() {
        let store = ScriptedStore::default();
        store.pending_for(
            "crashed",
            &[
                (1, Duration::from_secs(60)),
                (2, Duration::from_secs(60)),
                (3, Duration::from_secs(60)),
            ],
        );

        let stolen = steal_stale(&store, &plan(), MIN_IDLE, 1).await.unwrap();

        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].id, EntryId::new(1, 0));
    }

    #[tokio::test]
    async fn reclaims_released_entries_in_order() {
        let store = ScriptedStore::default();
        store.pending_for("none", &[(7, Duration::ZERO), (8, Duration::ZERO)]);

        let reclaimed = reclaim_released(&store, &plan(), 16).await.unwrap();

        let ids: Vec<EntryId> = reclaimed.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![EntryId::new(7, 0), EntryId::new(8, 0)]);
    }

    #[tokio::test]
    async fn nothing_to_reclaim_makes_no_claim() {
        let store = ScriptedStore::default();

        let reclaimed = reclaim_released(&store, &plan(), 16).await.unwrap();

        assert!(reclaimed.is_empty());
        assert!(claims(&store).is_empty());
    }
}
