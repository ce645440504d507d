use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{Buffers, CollectiveKind, OpContext};

/// Element sent from rank `from` to rank `to`.
fn cell(from: u32, to: u32) -> i32 {
    (from * 100 + to) as i32
}

#[tokio::test]
async fn test_alltoall_transposes() {
    for nproc in [1, 2, 3, 5, 8] {
        let results = run_collective(nproc, move |mut node| async move {
            let me = node.rank();
            let src: Vec<i32> = (0..nproc).map(|to| cell(me, to)).collect();
            let bufs = Buffers::new(vec![0; nproc as usize * 4], i32_bytes(&src));
            let first = node
                .engine_mut()
                .alltoall(bufs, 1, 4, OpContext::new(0))
                .unwrap();
            let done = node.wait(first).await.unwrap();
            assert_eq!(done.kind, CollectiveKind::Alltoall);
            from_i32_bytes(&done.result.unwrap())
        })
        .await;
        for (me, got) in results.iter().enumerate() {
            let want: Vec<i32> = (0..nproc).map(|from| cell(from, me as u32)).collect();
            assert_eq!(got, &want, "nproc {nproc}");
        }
    }
}

#[tokio::test]
async fn test_alltoall_in_place() {
    let results = run_collective(4, |mut node| async move {
        let me = node.rank();
        let mine: Vec<i32> = (0..4).map(|to| cell(me, to)).collect();
        let first = node
            .engine_mut()
            .alltoall(Buffers::in_place(i32_bytes(&mine)), 1, 4, OpContext::new(1))
            .unwrap();
        from_i32_bytes(&node.wait(first).await.unwrap().result.unwrap())
    })
    .await;
    for (me, got) in results.iter().enumerate() {
        let want: Vec<i32> = (0..4).map(|from| cell(from, me as u32)).collect();
        assert_eq!(got, &want);
    }
}
