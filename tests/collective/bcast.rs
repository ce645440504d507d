use super::helpers::{from_i32_bytes, i32_bytes, run_collective};
use collex::{CollectiveKind, OpContext};

#[tokio::test]
async fn test_bcast_from_every_root_position() {
    for nproc in [1, 3, 5, 8] {
        for root in [0, nproc / 2, nproc - 1] {
            let results = run_collective(nproc, move |mut node| async move {
                let rank = node.rank();
                let buf = if rank == root {
                    i32_bytes(&[7, 8, root as i32])
                } else {
                    vec![0; 12]
                };
                let first = node
                    .engine_mut()
                    .bcast(Some(buf), root, 3, 4, OpContext::new(root))
                    .unwrap();
                let done = node.wait(first).await.unwrap();
                assert_eq!(done.kind, CollectiveKind::Bcast);
                from_i32_bytes(&done.result.unwrap())
            })
            .await;
            for got in results {
                assert_eq!(got, vec![7, 8, root as i32], "nproc {nproc} root {root}");
            }
        }
    }
}
