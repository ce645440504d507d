use super::helpers::{from_i32_bytes, i32_bytes, run_collective, run_with_config};
use collex::{Buffers, CollexConfig, Communicator, DataType, OpContext, ReduceOp, reduce_fn};
use std::collections::BTreeSet;
use std::sync::Arc;

#[tokio::test]
async fn test_gather_on_sub_range() {
    let results = run_collective(6, |mut node| async move {
        let g = node.rank();
        if g < 2 {
            return None;
        }
        let comm = Arc::new(Communicator::sub_range(g, 2, 4).unwrap());
        let bufs = if comm.my_comm_rank() == 1 {
            Buffers::new(vec![0; 16], i32_bytes(&[g as i32]))
        } else {
            Buffers::send_only(i32_bytes(&[g as i32]))
        };
        let first = node
            .engine_mut()
            .gather(bufs, 1, 1, 4, OpContext::new(10).on(comm))
            .unwrap();
        node.wait(first).await.unwrap().result
    })
    .await;
    assert_eq!(from_i32_bytes(results[3].as_ref().unwrap()), vec![2, 3, 4, 5]);
    assert!(results[0].is_none() && results[5].is_none());
}

#[tokio::test]
async fn test_allgather_on_explicit_members_in_given_order() {
    let results = run_collective(6, |mut node| async move {
        let g = node.rank();
        if ![5, 1, 3].contains(&g) {
            return Vec::new();
        }
        let comm = Arc::new(Communicator::explicit(g, [5, 1, 3]).unwrap());
        let bufs = Buffers::new(vec![0; 12], i32_bytes(&[g as i32]));
        let first = node
            .engine_mut()
            .allgather(bufs, 1, 4, OpContext::new(11).on(comm))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
    })
    .await;
    for g in [5, 1, 3] {
        assert_eq!(results[g], vec![5, 1, 3]);
    }
}

#[tokio::test]
async fn test_scan_on_shifted_communicator() {
    let results = run_collective(6, |mut node| async move {
        let base = Arc::clone(node.engine().global_comm());
        let comm = Arc::new(Communicator::shifted(base, 2).unwrap());
        let fxn = reduce_fn(DataType::I64, ReduceOp::Sum);
        let bufs = Buffers::new(vec![0; 8], 1i64.to_le_bytes().to_vec());
        let first = node
            .engine_mut()
            .scan(bufs, 1, 8, fxn, OpContext::new(12).on(comm))
            .unwrap();
        let done = node.wait(first).await.unwrap();
        let bytes: [u8; 8] = done.result.unwrap().try_into().unwrap();
        (done.comm_rank, i64::from_le_bytes(bytes))
    })
    .await;
    for (g, (comm_rank, prefix)) in results.into_iter().enumerate() {
        assert_eq!(comm_rank as usize, (g + 4) % 6);
        assert_eq!(prefix, comm_rank as i64 + 1);
    }
}

#[tokio::test]
async fn test_bcast_on_rotated_ring() {
    // Local rank 0 of a ring rotated by 3 is global rank 3.
    let results = run_collective(5, |mut node| async move {
        let g = node.rank();
        let comm = Arc::new(Communicator::rotate(g, 5, 3).unwrap());
        let buf = if g == 3 { vec![42; 4] } else { vec![0; 4] };
        let first = node
            .engine_mut()
            .bcast(Some(buf), 0, 1, 4, OpContext::new(13).on(comm))
            .unwrap();
        node.wait(first).await.unwrap().result.unwrap()
    })
    .await;
    assert!(results.iter().all(|b| b == &vec![42; 4]));
}

#[tokio::test]
async fn test_allgatherv_on_index_list() {
    let ranks = vec![4, 0, 2];
    let results = run_collective(5, move |mut node| {
        let ranks = ranks.clone();
        async move {
            let g = node.rank();
            let Some(me) = ranks.iter().position(|&r| r == g) else {
                return Vec::new();
            };
            let comm = Arc::new(Communicator::index_list(me as u32, ranks).unwrap());
            let counts = [1, 2, 1];
            let src = i32_bytes(&vec![g as i32; counts[me]]);
            let first = node
                .engine_mut()
                .allgatherv(Buffers::new(vec![0; 16], src), &counts, 4, OpContext::new(14).on(comm))
                .unwrap();
            from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
        }
    })
    .await;
    for g in [4, 0, 2] {
        assert_eq!(results[g], vec![4, 0, 0, 2]);
    }
    assert!(results[1].is_empty());
}

#[tokio::test]
async fn test_collectives_on_smp_groups() {
    let config = CollexConfig {
        ranks_per_node: 2,
        ..CollexConfig::default()
    };
    let results = run_with_config(6, config, |mut node| async move {
        let g = node.rank();
        let global = Arc::clone(node.engine().global_comm());
        let neighbors = BTreeSet::from([g / 2 * 2, g / 2 * 2 + 1]);
        let group = node
            .engine()
            .create_smp_communicator(&global, &neighbors)
            .unwrap()
            .unwrap();
        assert!(group.balanced);
        let smp = Arc::clone(&group.smp);
        let owner = group.owner.clone();

        // Node-local exchange first.
        let bufs = Buffers::new(vec![0; 8], i32_bytes(&[g as i32]));
        let first = node
            .engine_mut()
            .allgather(bufs, 1, 4, OpContext::new(20).on(smp))
            .unwrap();
        let pair = from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap());
        assert_eq!(pair, vec![(g / 2 * 2) as i32, (g / 2 * 2 + 1) as i32]);

        // Then one representative per node gathers the node sums.
        let owner = owner?;
        let node_sum = pair.iter().sum::<i32>();
        let bufs = if owner.my_comm_rank() == 0 {
            Buffers::new(vec![0; 12], i32_bytes(&[node_sum]))
        } else {
            Buffers::send_only(i32_bytes(&[node_sum]))
        };
        let first = node
            .engine_mut()
            .gather(bufs, 0, 1, 4, OpContext::new(21).on(owner))
            .unwrap();
        node.wait(first).await.unwrap().result
    })
    .await;
    assert_eq!(from_i32_bytes(results[0].as_ref().unwrap()), vec![1, 5, 9]);
    assert!(results[1].is_none());
    assert!(results[2].is_none());
}
