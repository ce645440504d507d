use super::helpers::{from_i32_bytes, i32_bytes, run_with_config};
use collex::{Buffers, CollectiveKind, CollexConfig, DataType, OpContext, ReduceOp, reduce_fn};
use std::collections::BTreeSet;
use std::sync::Arc;

fn per_node(ranks_per_node: u32) -> CollexConfig {
    CollexConfig {
        ranks_per_node,
        ..CollexConfig::default()
    }
}

#[tokio::test]
async fn test_grouped_allreduce_and_allgather() {
    let results = run_with_config(6, per_node(2), |mut node| async move {
        let g = node.rank();
        let global = Arc::clone(node.engine().global_comm());
        let neighbors = BTreeSet::from([g / 2 * 2, g / 2 * 2 + 1]);
        let balanced = node
            .engine()
            .create_smp_communicator(&global, &neighbors)
            .unwrap()
            .is_some_and(|group| group.balanced);
        assert!(balanced);

        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let bufs = Buffers::new(vec![0; 8], i32_bytes(&[g as i32, 1]));
        let first = node
            .engine_mut()
            .allreduce(bufs, 2, 4, fxn, OpContext::new(30).cq(2))
            .unwrap();
        let done = node.wait(first).await.unwrap();
        assert_eq!((done.kind, done.tag, done.cq_id), (CollectiveKind::Allreduce, 30, 2));
        let sum = from_i32_bytes(&done.result.unwrap());

        let mut dst = vec![-1; 6];
        dst[g as usize] = g as i32 * 3;
        let first = node
            .engine_mut()
            .allgather(Buffers::in_place(i32_bytes(&dst)), 1, 4, OpContext::new(31))
            .unwrap();
        let done = node.wait(first).await.unwrap();
        assert_eq!((done.kind, done.tag), (CollectiveKind::Allgather, 31));
        let gathered = from_i32_bytes(&done.result.unwrap());

        assert_eq!(node.engine().active_collectives(), 0);
        (sum, gathered)
    })
    .await;
    for (sum, gathered) in results {
        assert_eq!(sum, vec![15, 6]);
        assert_eq!(gathered, vec![0, 3, 6, 9, 12, 15]);
    }
}

#[tokio::test]
async fn test_grouped_skeleton_allreduce() {
    let results = run_with_config(4, per_node(2), |mut node| async move {
        let g = node.rank();
        let global = Arc::clone(node.engine().global_comm());
        node.engine()
            .create_smp_communicator(&global, &BTreeSet::from([g / 2 * 2, g / 2 * 2 + 1]))
            .unwrap();
        let fxn = reduce_fn(DataType::F64, ReduceOp::Sum);
        let first = node
            .engine_mut()
            .allreduce(Buffers::skeleton(), 16, 8, fxn, OpContext::new(0))
            .unwrap();
        node.wait(first).await.unwrap().result
    })
    .await;
    assert!(results.iter().all(Option::is_none));
}

#[tokio::test]
async fn test_unbalanced_grouping_runs_flat() {
    // Three ranks per node over seven ranks leaves rank 6 alone on its node.
    let results = run_with_config(7, per_node(3), |mut node| async move {
        let g = node.rank();
        let global = Arc::clone(node.engine().global_comm());
        let first_on_node = g / 3 * 3;
        let neighbors: BTreeSet<u32> = (first_on_node..(first_on_node + 3).min(7)).collect();
        let group = node
            .engine()
            .create_smp_communicator(&global, &neighbors)
            .unwrap();
        assert!(group.is_none_or(|group| !group.balanced));

        let bufs = Buffers::new(vec![0; 28], i32_bytes(&[g as i32 + 1]));
        let first = node
            .engine_mut()
            .allgather(bufs, 1, 4, OpContext::new(40))
            .unwrap();
        let gathered = from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap());

        let fxn = reduce_fn(DataType::I32, ReduceOp::Max);
        let first = node
            .engine_mut()
            .allreduce(Buffers::in_place(i32_bytes(&[g as i32])), 1, 4, fxn, OpContext::new(41))
            .unwrap();
        let max = from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap());
        (gathered, max)
    })
    .await;
    for (gathered, max) in results {
        assert_eq!(gathered, (1..=7).collect::<Vec<i32>>());
        assert_eq!(max, vec![6]);
    }
}
