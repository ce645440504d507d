use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, DataType, OpContext, ReduceOp, Transport, WorkspaceStats, reduce_fn};

#[tokio::test]
async fn test_gather_returns_every_workspace() {
    let stats = run_collective(9, |mut node| async move {
        let rank = node.rank();
        let bufs = if rank == 4 {
            Buffers::new(vec![0; 36], i32_bytes(&[rank as i32]))
        } else {
            Buffers::send_only(i32_bytes(&[rank as i32]))
        };
        let first = node
            .engine_mut()
            .gather(bufs, 4, 1, 4, OpContext::new(0))
            .unwrap();
        node.wait(first).await.unwrap();
        node.engine().transport().workspace().stats()
    })
    .await;
    for (rank, s) in stats.iter().enumerate() {
        if rank == 4 {
            // The root accumulates straight into the caller's buffer.
            assert_eq!(s, &WorkspaceStats::default());
        } else {
            assert_eq!(s.allocated, 1, "rank {rank}");
            assert_eq!(s.outstanding(), 0, "rank {rank}");
        }
    }
}

#[tokio::test]
async fn test_scan_returns_both_workspaces() {
    let stats = run_collective(5, |mut node| async move {
        let fxn = reduce_fn(DataType::I32, ReduceOp::Sum);
        let first = node
            .engine_mut()
            .scan(Buffers::in_place(i32_bytes(&[1, 2])), 2, 4, fxn, OpContext::new(0))
            .unwrap();
        node.wait(first).await.unwrap();
        node.engine().transport().workspace().stats()
    })
    .await;
    for s in stats {
        assert_eq!(s.allocated, 2);
        assert_eq!(s.freed, 2);
    }
}

#[tokio::test]
async fn test_skeleton_runs_allocate_nothing() {
    let stats = run_collective(6, |mut node| async move {
        let eng = node.engine_mut();
        let fxn = reduce_fn(DataType::F64, ReduceOp::Sum);
        let firsts = [
            eng.gather(Buffers::skeleton(), 2, 8, 8, OpContext::new(0)).unwrap(),
            eng.scan(Buffers::skeleton(), 8, 8, fxn, OpContext::new(0)).unwrap(),
            eng.allgather(Buffers::skeleton(), 8, 8, OpContext::new(0)).unwrap(),
        ];
        for first in firsts {
            let done = node.wait(first).await.unwrap();
            assert!(done.result.is_none());
        }
        node.engine().transport().workspace().stats()
    })
    .await;
    assert!(stats.iter().all(|s| *s == WorkspaceStats::default()));
}

#[tokio::test]
async fn test_gather_workspace_pairing_every_size_and_root() {
    for nproc in [2, 3, 4, 5, 8, 9] {
        for root in 0..nproc {
            let stats = run_collective(nproc, move |mut node| async move {
                let rank = node.rank();
                let bufs = if rank == root {
                    Buffers::new(vec![0; nproc as usize * 8], i32_bytes(&[rank as i32, 1]))
                } else {
                    Buffers::send_only(i32_bytes(&[rank as i32, 1]))
                };
                let first = node
                    .engine_mut()
                    .gather(bufs, root, 2, 4, OpContext::new(root))
                    .unwrap();
                node.wait(first).await.unwrap();
                node.engine().transport().workspace().stats()
            })
            .await;
            for (rank, s) in stats.iter().enumerate() {
                assert_eq!(s.outstanding(), 0, "nproc {nproc} root {root} rank {rank}");
                if rank as u32 == root {
                    assert_eq!(s.allocated, 0, "nproc {nproc} root {root}");
                }
            }
        }
    }
}

#[tokio::test]
async fn test_in_place_allgatherv_works_in_destination() {
    let counts = [2, 1, 3, 1, 2];
    let stats = run_collective(5, move |mut node| async move {
        let rank = node.rank() as usize;
        let offset: usize = counts[..rank].iter().sum();
        let mut dst = vec![-1; 9];
        for slot in &mut dst[offset..offset + counts[rank]] {
            *slot = rank as i32;
        }
        let first = node
            .engine_mut()
            .allgatherv(Buffers::in_place(i32_bytes(&dst)), &counts, 4, OpContext::new(0))
            .unwrap();
        let done = node.wait(first).await.unwrap();
        assert_eq!(
            from_i32_bytes(&done.result.unwrap()),
            vec![0, 0, 1, 2, 2, 2, 3, 4, 4]
        );
        node.engine().transport().workspace().stats()
    })
    .await;
    assert!(stats.iter().all(|s| *s == WorkspaceStats::default()));
}

#[tokio::test]
async fn test_scatter_relays_return_workspace() {
    let stats = run_collective(8, |mut node| async move {
        let rank = node.rank();
        let src = (rank == 5).then(|| i32_bytes(&(0..8).collect::<Vec<i32>>()));
        let bufs = Buffers {
            dst: Some(vec![0; 4]),
            src,
        };
        let first = node
            .engine_mut()
            .scatter(bufs, 5, 1, 4, OpContext::new(0))
            .unwrap();
        node.wait(first).await.unwrap();
        node.engine().transport().workspace().stats()
    })
    .await;
    for (rank, s) in stats.iter().enumerate() {
        assert_eq!(s.outstanding(), 0, "rank {rank}");
    }
    // Virtual ranks 2, 4 and 6 relay to children.
    assert_eq!(stats.iter().map(|s| s.allocated).sum::<u64>(), 3);
}
