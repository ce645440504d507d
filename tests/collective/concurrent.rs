use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, CollectiveKind, DataType, OpContext, ReduceOp, reduce_fn};
use std::collections::HashMap;
use std::time::Duration;

#[tokio::test]
async fn test_overlapping_collectives_complete_independently() {
    let results = run_collective(5, |mut node| async move {
        let r = node.rank() as i32;
        let eng = node.engine_mut();
        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let firsts = [
            eng.allgather(Buffers::new(vec![0; 20], i32_bytes(&[r])), 1, 4, OpContext::new(1).cq(1))
                .unwrap(),
            eng.scan(Buffers::in_place(i32_bytes(&[r])), 1, 4, fxn, OpContext::new(1).cq(2))
                .unwrap(),
            eng.barrier(OpContext::new(1).cq(3)).unwrap(),
        ];
        let mut by_kind = HashMap::new();
        for first in firsts {
            let done = node.wait(first).await.unwrap();
            by_kind.insert(done.kind, done);
        }
        assert_eq!(node.engine().active_collectives(), 0);
        by_kind
    })
    .await;
    for (rank, done) in results.iter().enumerate() {
        let r = rank as i32;
        let gathered = &done[&CollectiveKind::Allgather];
        assert_eq!(gathered.cq_id, 1);
        assert_eq!(from_i32_bytes(gathered.result.as_ref().unwrap()), vec![0, 1, 2, 3, 4]);
        let scanned = &done[&CollectiveKind::Scan];
        assert_eq!(from_i32_bytes(scanned.result.as_ref().unwrap()), vec![r * (r + 1) / 2]);
        assert_eq!(done[&CollectiveKind::Barrier].cq_id, 3);
    }
}

#[tokio::test]
async fn test_late_rank_replays_early_messages() {
    // Rank 0 starts long after its peers have sent it everything.
    let results = run_collective(4, |mut node| async move {
        let rank = node.rank();
        if rank == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let first = node
            .engine_mut()
            .scan(Buffers::new(vec![0; 4], i32_bytes(&[10])), 1, 4, fxn, OpContext::new(0))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())[0]
    })
    .await;
    assert_eq!(results, vec![10, 20, 30, 40]);
}

#[tokio::test]
async fn test_gather_root_starts_last() {
    let results = run_collective(7, |mut node| async move {
        let rank = node.rank();
        let bufs = if rank == 2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Buffers::new(vec![0; 28], i32_bytes(&[rank as i32]))
        } else {
            Buffers::send_only(i32_bytes(&[rank as i32]))
        };
        let first = node
            .engine_mut()
            .gather(bufs, 2, 1, 4, OpContext::new(5))
            .unwrap();
        node.wait(first).await.unwrap().result
    })
    .await;
    assert_eq!(
        from_i32_bytes(results[2].as_ref().unwrap()),
        vec![0, 1, 2, 3, 4, 5, 6]
    );
}
