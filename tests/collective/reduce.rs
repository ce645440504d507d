use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, CollectiveKind, DataType, OpContext, ReduceOp, reduce_fn};

const SENTINEL: [u8; 4] = [0xCD; 4];

#[tokio::test]
async fn test_reduce_every_root_position() {
    for nproc in [1, 2, 3, 5, 8] {
        for root in 0..nproc {
            let results = run_collective(nproc, move |mut node| async move {
                let rank = node.rank();
                let dst = if rank == root {
                    vec![0; 8]
                } else {
                    SENTINEL.to_vec()
                };
                let src = i32_bytes(&[rank as i32, 2]);
                let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
                let first = node
                    .engine_mut()
                    .reduce(Buffers::new(dst, src), root, 2, 4, fxn, OpContext::new(root))
                    .unwrap();
                let done = node.wait(first).await.unwrap();
                assert_eq!(done.kind, CollectiveKind::Reduce);
                done.result.unwrap()
            })
            .await;
            let n = nproc as i32;
            for (rank, got) in results.iter().enumerate() {
                if rank as u32 == root {
                    assert_eq!(from_i32_bytes(got), vec![n * (n - 1) / 2, 2 * n]);
                } else {
                    assert_eq!(got, &SENTINEL, "nproc {nproc} root {root} rank {rank}");
                }
            }
        }
    }
}

#[tokio::test]
async fn test_reduce_product_in_place_at_root() {
    let results = run_collective(4, |mut node| async move {
        let rank = node.rank();
        let contribution = i32_bytes(&[rank as i32 + 1]);
        let bufs = if rank == 1 {
            Buffers::in_place(contribution)
        } else {
            Buffers::send_only(contribution)
        };
        let fxn = reduce_fn(DataType::I32, ReduceOp::Prod);
        let first = node
            .engine_mut()
            .reduce(bufs, 1, 1, 4, fxn, OpContext::new(0))
            .unwrap();
        node.wait(first).await.unwrap().result
    })
    .await;
    assert_eq!(from_i32_bytes(results[1].as_ref().unwrap()), vec![24]);
    assert!(results.iter().enumerate().all(|(r, res)| r == 1 || res.is_none()));
}
