//! End-to-end UPDATE execution against an in-memory shard cluster.

mod common;

use std::sync::Arc;

use common::{four_shards, gateway, range, set_status, two_shards, MemoryCluster};
use holo_gateway::error::{STATUS_NO_SPACE_LEFT, STATUS_STORAGE_INTERNAL};
use holo_gateway::{
    ColumnDef, GatewayError, Limit, MutationErrorKind, Scope, ShardMap, TableHandle,
    UpdateRequest,
};

fn orders(map: Arc<ShardMap>) -> TableHandle {
    TableHandle::new(
        "shop",
        "orders",
        100,
        vec![ColumnDef::new(1, "id"), ColumnDef::new(2, "status")],
        map,
    )
}

fn scope(start: &[u8], end: &[u8]) -> Scope {
    Scope::new(start.to_vec(), end.to_vec()).expect("scope")
}

fn keys(raw: &[&str]) -> Vec<Vec<u8>> {
    raw.iter().map(|key| key.as_bytes().to_vec()).collect()
}

#[tokio::test]
async fn key_update_visits_owner_once() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["k1", "k2"]);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let result = gateway
        .execute_update(&table, &UpdateRequest::single_key(b"k1".to_vec(), set_status()))
        .await
        .expect("update");

    assert_eq!(result.affected_rows, 1);
    let visits = cluster.visits();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].shard_id, 1);
    assert_eq!(visits[0].key, b"k1".to_vec());
    assert_eq!(visits[0].scope, None);
    assert_eq!(cluster.mutated_keys(), keys(&["k1"]));
    assert_eq!(gateway.metrics().snapshot().single_key_updates, 1);
}

#[tokio::test]
async fn unlimited_scope_sums_every_intersecting_shard() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "h", "j", "n", "o", "p", "s", "u"]);
    let gateway = gateway(&cluster);
    let table = orders(four_shards());

    let result = gateway
        .execute_update(&table, &UpdateRequest::scope(scope(b"h", b"t"), set_status()))
        .await
        .expect("update");

    // [h,t) intersects [g,m) [m,s) [s,z).
    assert_eq!(result.affected_rows, 6);
    assert_eq!(cluster.applied_shards(), vec![2, 3, 4]);
    assert_eq!(cluster.mutated_keys(), keys(&["h", "j", "n", "o", "p", "s"]));
    assert_eq!(gateway.metrics().snapshot().shard_visits, 3);
}

#[tokio::test]
async fn scope_walk_uses_strictly_increasing_cursors() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "h", "n", "t"]);
    let gateway = gateway(&cluster);
    let table = orders(four_shards());

    let result = gateway
        .execute_update(&table, &UpdateRequest::scope(scope(b"a", b"z"), set_status()))
        .await
        .expect("update");

    assert_eq!(result.affected_rows, 4);
    let visits = cluster.visits();
    let cursors: Vec<Vec<u8>> = visits.iter().map(|visit| visit.key.clone()).collect();
    assert_eq!(cursors, keys(&["a", "g", "m", "s"]));
    assert!(cursors.windows(2).all(|pair| pair[0] < pair[1]));
    // Each visit is sent only the part of the scope not yet covered.
    for visit in &visits {
        assert_eq!(visit.scope, Some((visit.key.clone(), b"z".to_vec())));
    }
    assert_eq!(gateway.metrics().snapshot().wide_fanouts, 1);
}

#[tokio::test]
async fn limit_budget_shrinks_across_shards() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "c", "d", "e"]);
    cluster.insert_rows(&["n", "o", "p", "q", "r", "s", "t", "u", "v", "w"]);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let request = UpdateRequest::scope(scope(b"c", b"x"), set_status()).with_limit(Limit::new(5));
    let result = gateway.execute_update(&table, &request).await.expect("update");

    assert_eq!(result.affected_rows, 5);
    let visits = cluster.visits();
    assert_eq!(visits.len(), 2);
    assert_eq!(visits[0].limit, Some(5));
    assert_eq!(visits[1].limit, Some(2));
    assert_eq!(cluster.mutated_keys(), keys(&["c", "d", "e", "n", "o"]));
}

#[tokio::test]
async fn exhausted_limit_stops_visiting_shards() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b0", "b1", "b2", "b3", "b4", "b5", "h0", "h1", "n0", "t0"]);
    let gateway = gateway(&cluster);
    let table = orders(four_shards());

    let request = UpdateRequest::scope(scope(b"a", b"z"), set_status()).with_limit(Limit::new(4));
    let result = gateway.execute_update(&table, &request).await.expect("update");

    assert_eq!(result.affected_rows, 4);
    assert_eq!(cluster.applied_shards(), vec![1]);
    assert_eq!(cluster.mutated_keys(), keys(&["b0", "b1", "b2", "b3"]));
}

#[tokio::test]
async fn zero_limit_and_point_scope_touch_nothing() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "k", "k1"]);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let zero = UpdateRequest::scope(scope(b"a", b"z"), set_status()).with_limit(Limit::new(0));
    assert_eq!(gateway.execute_update(&table, &zero).await.expect("zero limit").affected_rows, 0);

    let zero_key = UpdateRequest::single_key(b"k1".to_vec(), set_status()).with_limit(Limit::new(0));
    assert_eq!(
        gateway.execute_update(&table, &zero_key).await.expect("zero limit key").affected_rows,
        0
    );

    let point = UpdateRequest::scope(scope(b"k", b"k"), set_status());
    assert_eq!(gateway.execute_update(&table, &point).await.expect("point").affected_rows, 0);

    assert!(cluster.visits().is_empty());
    assert!(cluster.mutated_keys().is_empty());
    assert_eq!(gateway.pool().created(), 0);
}

#[tokio::test(start_paused = true)]
async fn single_route_change_is_retried_once() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["k1"]);
    cluster.fail_route(1, 1);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let result = gateway
        .execute_update(&table, &UpdateRequest::single_key(b"k1".to_vec(), set_status()))
        .await
        .expect("update");

    assert_eq!(result.affected_rows, 1);
    assert_eq!(cluster.visits().len(), 2);
    assert_eq!(cluster.times_mutated(b"k1"), 1);
    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.route_change_retries, 1);
    assert_eq!(snapshot.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn persistent_route_change_times_out() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["p"]);
    cluster.fail_route_forever(2);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let err = gateway
        .execute_update(&table, &UpdateRequest::single_key(b"p".to_vec(), set_status()))
        .await
        .expect_err("timeout");

    let attempts = match &err {
        GatewayError::Timeout { attempts, .. } => *attempts,
        other => panic!("unexpected error: {other}"),
    };
    // One initial attempt plus one per granted retry, nothing after the budget ran out.
    assert_eq!(cluster.visits().len(), attempts as usize + 1);
    assert_eq!(cluster.times_mutated(b"p"), 0);
    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.backoff_timeouts, 1);
    assert_eq!(snapshot.route_change_retries, u64::from(attempts));
    assert_eq!(gateway.pool().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn resumed_walk_skips_completed_shards() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "c", "h", "i", "n", "o", "t", "u"]);
    cluster.fail_route(3, 1);
    let gateway = gateway(&cluster);
    let table = orders(four_shards());

    let result = gateway
        .execute_update(&table, &UpdateRequest::scope(scope(b"a", b"z"), set_status()))
        .await
        .expect("update");

    assert_eq!(result.affected_rows, 8);
    assert_eq!(cluster.applied_shards(), vec![1, 2, 3, 4]);
    let visited: Vec<u64> = cluster.visits().iter().map(|visit| visit.shard_id).collect();
    assert_eq!(visited, vec![1, 2, 3, 3, 4]);
    assert_eq!(cluster.mutated_keys().len(), 8);
    assert!(cluster.no_row_mutated_twice());
}

#[tokio::test(start_paused = true)]
async fn walk_follows_split_published_mid_flight() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["c", "n", "r"]);
    let map = two_shards();
    cluster.fail_route(2, 1);
    // Shard 2 splits into 5 [m,q) and 6 [q,z) while the walk is in flight.
    cluster.publish_on_route_fault(
        map.clone(),
        vec![range(1, b"a", b"m"), range(5, b"m", b"q"), range(6, b"q", b"z")],
    );
    let gateway = gateway(&cluster);
    let table = orders(map);

    let request = UpdateRequest::scope(scope(b"a", b"z"), set_status());
    let result = gateway.execute_update(&table, &request).await.expect("update");

    assert_eq!(result.affected_rows, 3);
    assert_eq!(cluster.applied_shards(), vec![1, 5, 6]);
    assert_eq!(cluster.mutated_keys(), keys(&["c", "n", "r"]));
    assert!(cluster.no_row_mutated_twice());
}

#[tokio::test(start_paused = true)]
async fn walk_resumed_on_merged_shard_skips_finished_rows() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["c", "p"]);
    let map = two_shards();
    cluster.fail_route(2, 1);
    // Shards 1 and 2 merge into 7 [a,z) after shard 1 was already updated.
    cluster.publish_on_route_fault(map.clone(), vec![range(7, b"a", b"z")]);
    let gateway = gateway(&cluster);
    let table = orders(map);

    let request = UpdateRequest::scope(scope(b"a", b"z"), set_status()).with_limit(Limit::new(10));
    let result = gateway.execute_update(&table, &request).await.expect("update");

    assert_eq!(result.affected_rows, 2);
    assert_eq!(cluster.times_mutated(b"c"), 1);
    assert_eq!(cluster.times_mutated(b"p"), 1);
    let visits = cluster.visits();
    let resumed = visits.last().expect("resumed visit");
    assert_eq!(resumed.shard_id, 7);
    assert_eq!(resumed.scope, Some((b"m".to_vec(), b"z".to_vec())));
    assert_eq!(resumed.limit, Some(9));
}

#[tokio::test]
async fn shard_status_errors_are_not_retried() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "c", "d", "p"]);
    cluster.fail_status(2, STATUS_NO_SPACE_LEFT);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    let err = gateway
        .execute_update(&table, &UpdateRequest::scope(scope(b"a", b"z"), set_status()))
        .await
        .expect_err("no space");

    assert!(matches!(
        err,
        GatewayError::Mutation {
            code: STATUS_NO_SPACE_LEFT,
            kind: MutationErrorKind::NoSpaceLeft,
        }
    ));
    assert_eq!(cluster.visits().len(), 2);
    assert_eq!(cluster.mutated_keys(), keys(&["b", "c", "d"]));
    let snapshot = gateway.metrics().snapshot();
    assert_eq!(snapshot.route_change_retries, 0);
    assert_eq!(snapshot.mutation_failures, 1);
}

#[tokio::test]
async fn pool_handles_return_on_every_path() {
    let cluster = MemoryCluster::new();
    cluster.insert_rows(&["b", "n"]);
    cluster.fail_status(2, STATUS_STORAGE_INTERNAL);
    let gateway = gateway(&cluster);
    let table = orders(two_shards());

    gateway
        .execute_update(&table, &UpdateRequest::single_key(b"b".to_vec(), set_status()))
        .await
        .expect("update");
    gateway
        .execute_update(&table, &UpdateRequest::single_key(b"n".to_vec(), set_status()))
        .await
        .expect_err("internal");

    assert_eq!(gateway.pool().in_use(), 0);
    assert_eq!(gateway.pool().idle(), 1);
    assert_eq!(gateway.pool().created(), 1);
}
