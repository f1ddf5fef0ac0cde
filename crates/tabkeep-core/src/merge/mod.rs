//! Merge engine for two replicas of the collection dataset.
//!
//! Pure and deterministic: no I/O, no clock, no failure modes. Tombstones
//! always win, item and collection order is last-writer-wins on
//! `order_updated_at`, and item *content* always comes from the second
//! argument. That last rule is inherited behavior that other replicas depend
//! on; callers pass local first and remote second.

mod tombstones;

use std::collections::HashMap;

use crate::models::{Collection, Item, RecordId, SyncSnapshot, Tombstone};

pub use tombstones::{merge_tombstones, prune_tombstones, DeletedMap};

/// Records that take part in the positional two-pass merge.
trait Ordered {
    fn record_id(&self) -> RecordId;
    fn created_at(&self) -> i64;
    fn order_updated_at(&self) -> i64;
}

impl Ordered for Item {
    fn record_id(&self) -> RecordId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn order_updated_at(&self) -> i64 {
        self.order_updated_at
    }
}

impl Ordered for Collection {
    fn record_id(&self) -> RecordId {
        self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn order_updated_at(&self) -> i64 {
        self.order_updated_at
    }
}

struct Placed<T> {
    position: usize,
    value: T,
}

/// Two-pass positional merge shared by items and collections.
fn merge_ordered<T, F>(
    first: Vec<T>,
    second: Vec<T>,
    deleted: &DeletedMap,
    mut combine: F,
) -> Vec<T>
where
    T: Ordered,
    F: FnMut(T, T) -> T,
{
    let mut order = Vec::with_capacity(first.len() + second.len());
    let mut placed: HashMap<RecordId, Placed<T>> = HashMap::with_capacity(order.capacity());

    for (position, value) in first.into_iter().enumerate() {
        let id = value.record_id();
        if deleted.contains(&id) {
            continue;
        }
        order.push(id);
        placed.insert(id, Placed { position, value });
    }

    for (position, incoming) in second.into_iter().enumerate() {
        let id = incoming.record_id();
        if deleted.contains(&id) {
            continue;
        }

        if let Some(existing) = placed.remove(&id) {
            let reordered = position != existing.position
                && incoming.order_updated_at() > existing.value.order_updated_at();
            let position = if reordered {
                position
            } else {
                existing.position
            };
            placed.insert(
                id,
                Placed {
                    position,
                    value: combine(existing.value, incoming),
                },
            );
        } else {
            order.push(id);
            placed.insert(
                id,
                Placed {
                    position,
                    value: incoming,
                },
            );
        }
    }

    let mut merged: Vec<Placed<T>> = order.iter().filter_map(|id| placed.remove(id)).collect();
    merged.sort_by(|left, right| {
        left.position
            .cmp(&right.position)
            .then_with(|| left.value.created_at().cmp(&right.value.created_at()))
    });
    merged.into_iter().map(|entry| entry.value).collect()
}

/// Merge two item sequences of the same collection.
///
/// For ids on both sides the result is `{...a, ...b}` with
/// `order_updated_at = max(a, b)`. The position only moves to `b`'s index when
/// `b` reordered strictly later than `a`.
pub fn merge_items(items_a: Vec<Item>, items_b: Vec<Item>, deleted: &DeletedMap) -> Vec<Item> {
    merge_ordered(items_a, items_b, deleted, |a, b| {
        let order_updated_at = a.order_updated_at.max(b.order_updated_at);
        let mut merged = a.overlaid_with(b);
        merged.order_updated_at = order_updated_at;
        merged
    })
}

/// Merge two versions of the same collection.
///
/// Scalar fields come from the side with the greater `updated_at` (`b` on a
/// tie); items always merge in `a`-then-`b` order.
pub fn merge_collection(
    mut collection_a: Collection,
    mut collection_b: Collection,
    deleted: &DeletedMap,
) -> Collection {
    let order_updated_at = collection_a
        .order_updated_at
        .max(collection_b.order_updated_at);
    let items = merge_items(
        std::mem::take(&mut collection_a.items),
        std::mem::take(&mut collection_b.items),
        deleted,
    );

    let mut merged = if collection_a.updated_at > collection_b.updated_at {
        collection_b.overlaid_with(collection_a)
    } else {
        collection_a.overlaid_with(collection_b)
    };
    merged.items = items;
    merged.order_updated_at = order_updated_at;
    merged
}

/// Strip tombstoned items from every collection, including those present on
/// one side only.
fn without_deleted_items(collections: Vec<Collection>, deleted: &DeletedMap) -> Vec<Collection> {
    collections
        .into_iter()
        .map(|mut collection| {
            collection.items.retain(|item| !deleted.contains(&item.id));
            collection
        })
        .collect()
}

/// Merge the local and remote replicas into one snapshot.
///
/// The returned snapshot carries timestamp `0`; the orchestrator stamps it
/// before upload.
pub fn merge_snapshots(
    local_collections: Vec<Collection>,
    remote_collections: Vec<Collection>,
    local_deleted: &[Tombstone],
    remote_deleted: &[Tombstone],
) -> SyncSnapshot {
    let deleted = merge_tombstones(local_deleted, remote_deleted);
    let collections = merge_ordered(
        without_deleted_items(local_collections, &deleted),
        without_deleted_items(remote_collections, &deleted),
        &deleted,
        |local, remote| merge_collection(local, remote, &deleted),
    );
    SyncSnapshot::new(collections, deleted.into_tombstones())
}
