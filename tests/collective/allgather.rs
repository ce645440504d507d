use super::helpers::{from_i32_bytes, i32_bytes, run_collective, run_with_config};
use collex::{AllgatherAlgorithm, Buffers, CollectiveKind, CollexConfig, OpContext};

/// Rank `r` contributes `r % 3` elements, so some ranks contribute nothing.
fn counts(nproc: u32) -> Vec<usize> {
    (0..nproc as usize).map(|r| r % 3).collect()
}

fn contribution(rank: u32, count: usize) -> Vec<i32> {
    (0..count as i32).map(|i| rank as i32 * 100 + i).collect()
}

fn expected(counts: &[usize]) -> Vec<i32> {
    counts
        .iter()
        .enumerate()
        .flat_map(|(r, &c)| contribution(r as u32, c))
        .collect()
}

#[tokio::test]
async fn test_allgatherv_variable_counts() {
    for nproc in [1, 2, 3, 5, 7, 8, 13] {
        let counts = counts(nproc);
        let want = expected(&counts);
        let results = run_collective(nproc, move |mut node| {
            let counts = counts.clone();
            async move {
                let rank = node.rank();
                let total: usize = counts.iter().sum();
                let src = i32_bytes(&contribution(rank, counts[rank as usize]));
                let bufs = Buffers::new(vec![0; total * 4], src);
                let first = node
                    .engine_mut()
                    .allgatherv(bufs, &counts, 4, OpContext::new(1))
                    .unwrap();
                let done = node.wait(first).await.unwrap();
                assert_eq!(done.kind, CollectiveKind::Allgatherv);
                assert_eq!(done.comm_rank, rank);
                from_i32_bytes(&done.result.unwrap())
            }
        })
        .await;
        for (rank, got) in results.iter().enumerate() {
            assert_eq!(got, &want, "nproc {nproc} rank {rank}");
        }
    }
}

#[tokio::test]
async fn test_allgatherv_in_place() {
    let counts = vec![2, 1, 3, 1, 2];
    let want = expected(&counts);
    let results = run_collective(5, move |mut node| {
        let counts = counts.clone();
        async move {
            let rank = node.rank() as usize;
            let displ: usize = counts[..rank].iter().sum();
            let total: usize = counts.iter().sum();
            let mut dst = vec![-1i32; total];
            dst[displ..displ + counts[rank]]
                .copy_from_slice(&contribution(rank as u32, counts[rank]));
            let first = node
                .engine_mut()
                .allgatherv(Buffers::in_place(i32_bytes(&dst)), &counts, 4, OpContext::new(2))
                .unwrap();
            let done = node.wait(first).await.unwrap();
            from_i32_bytes(&done.result.unwrap())
        }
    })
    .await;
    assert!(results.iter().all(|r| r == &want));
}

async fn uniform_allgather(nproc: u32, algorithm: AllgatherAlgorithm) -> Vec<Vec<i32>> {
    let config = CollexConfig {
        allgather: algorithm,
        ..CollexConfig::default()
    };
    run_with_config(nproc, config, move |mut node| async move {
        let rank = node.rank() as i32;
        let bufs = Buffers::new(vec![0; nproc as usize * 8], i32_bytes(&[rank, -rank]));
        let first = node
            .engine_mut()
            .allgather(bufs, 2, 4, OpContext::new(3))
            .unwrap();
        let done = node.wait(first).await.unwrap();
        assert_eq!(done.kind, CollectiveKind::Allgather);
        from_i32_bytes(&done.result.unwrap())
    })
    .await
}

#[tokio::test]
async fn test_allgather_bruck_and_ring_agree() {
    for nproc in [2, 3, 4, 6] {
        let want: Vec<i32> = (0..nproc as i32).flat_map(|r| [r, -r]).collect();
        let bruck = uniform_allgather(nproc, AllgatherAlgorithm::Bruck).await;
        let ring = uniform_allgather(nproc, AllgatherAlgorithm::Ring).await;
        for rank in 0..nproc as usize {
            assert_eq!(bruck[rank], want, "bruck nproc {nproc} rank {rank}");
            assert_eq!(ring[rank], want, "ring nproc {nproc} rank {rank}");
        }
    }
}

#[tokio::test]
async fn test_allgatherv_skeleton() {
    let results = run_collective(5, |mut node| async move {
        let first = node
            .engine_mut()
            .allgatherv(Buffers::skeleton(), &[4, 4, 4, 4, 4], 8, OpContext::new(4).cq(9))
            .unwrap();
        node.wait(first).await.unwrap()
    })
    .await;
    for done in results {
        assert!(done.result.is_none());
        assert_eq!(done.cq_id, 9);
    }
}
