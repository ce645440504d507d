use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, CollectiveKind, DataType, OpContext, ReduceOp, reduce_fn};

#[tokio::test]
async fn test_allreduce_sum_any_size() {
    for nproc in [1, 2, 3, 4, 5, 6, 8] {
        let results = run_collective(nproc, |mut node| async move {
            let rank = node.rank() as i32;
            // Five elements split unevenly across the halving steps.
            let src = i32_bytes(&[rank, 1, rank * rank, -rank, 100]);
            let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
            let first = node
                .engine_mut()
                .allreduce(Buffers::new(vec![0; 20], src), 5, 4, fxn, OpContext::new(1))
                .unwrap();
            let done = node.wait(first).await.unwrap();
            assert_eq!(done.kind, CollectiveKind::Allreduce);
            from_i32_bytes(&done.result.unwrap())
        })
        .await;
        let n = nproc as i32;
        let sum: i32 = (0..n).sum();
        let squares: i32 = (0..n).map(|r| r * r).sum();
        for got in results {
            assert_eq!(got, vec![sum, n, squares, -sum, 100 * n], "nproc {nproc}");
        }
    }
}

#[tokio::test]
async fn test_allreduce_max_in_place() {
    let results = run_collective(7, |mut node| async move {
        let rank = node.rank() as i32;
        let fxn = reduce_fn(DataType::I32, ReduceOp::Max);
        let first = node
            .engine_mut()
            .allreduce(Buffers::in_place(i32_bytes(&[rank, -rank])), 2, 4, fxn, OpContext::new(2))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
    })
    .await;
    assert!(results.iter().all(|r| *r == vec![6, 0]));
}

#[tokio::test]
async fn test_allreduce_fewer_elements_than_ranks() {
    let results = run_collective(8, |mut node| async move {
        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let first = node
            .engine_mut()
            .allreduce(Buffers::in_place(i32_bytes(&[1])), 1, 4, fxn, OpContext::new(3))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
    })
    .await;
    assert!(results.iter().all(|r| *r == vec![8]));
}
