use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, CollectiveKind, DataType, OpContext, ReduceOp, reduce_fn};

#[tokio::test]
async fn test_scan_sum_of_ones() {
    for nproc in [1, 2, 4, 6] {
        let results = run_collective(nproc, |mut node| async move {
            let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
            let bufs = Buffers::new(vec![0; 4], i32_bytes(&[1]));
            let first = node
                .engine_mut()
                .scan(bufs, 1, 4, fxn, OpContext::new(0))
                .unwrap();
            let done = node.wait(first).await.unwrap();
            assert_eq!(done.kind, CollectiveKind::Scan);
            from_i32_bytes(&done.result.unwrap())
        })
        .await;
        for (rank, got) in results.iter().enumerate() {
            assert_eq!(got, &vec![rank as i32 + 1], "nproc {nproc}");
        }
    }
}

#[tokio::test]
async fn test_scan_in_place_multi_element() {
    // Element 0 sums ranks, element 1 sums squares.
    let results = run_collective(7, |mut node| async move {
        let r = node.rank() as i32;
        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let first = node
            .engine_mut()
            .scan(Buffers::in_place(i32_bytes(&[r, r * r])), 2, 4, fxn, OpContext::new(1))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
    })
    .await;
    for (rank, got) in results.iter().enumerate() {
        let r = rank as i32;
        assert_eq!(got, &vec![r * (r + 1) / 2, r * (r + 1) * (2 * r + 1) / 6]);
    }
}

#[tokio::test]
async fn test_scan_max_is_running_maximum() {
    let values = [3, 1, 4, 1, 5, 9, 2, 6];
    let results = run_collective(8, move |mut node| async move {
        let v = values[node.rank() as usize];
        let fxn = reduce_fn(DataType::I32, ReduceOp::Max);
        let first = node
            .engine_mut()
            .scan(Buffers::new(vec![0; 4], i32_bytes(&[v])), 1, 4, fxn, OpContext::new(2))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())[0]
    })
    .await;
    assert_eq!(results, vec![3, 3, 4, 4, 5, 9, 9, 9]);
}
