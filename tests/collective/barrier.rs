use super::helpers::run_collective;
use collex::{CollectiveKind, OpContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test]
async fn test_barrier_sizes() {
    for nproc in [1, 2, 5, 8] {
        let results = run_collective(nproc, |mut node| async move {
            let first = node.engine_mut().barrier(OpContext::new(0)).unwrap();
            node.wait(first).await.unwrap()
        })
        .await;
        assert!(results.iter().all(|d| d.kind == CollectiveKind::Barrier));
    }
}

#[tokio::test]
async fn test_no_rank_leaves_before_all_arrive() {
    let arrived = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&arrived);
    let seen = run_collective(6, move |mut node| {
        let arrived = Arc::clone(&counter);
        async move {
            // Stagger arrivals so late ranks are still asleep when early
            // ranks enter the barrier.
            tokio::time::sleep(std::time::Duration::from_millis(5 * node.rank() as u64)).await;
            arrived.fetch_add(1, Ordering::SeqCst);
            let first = node.engine_mut().barrier(OpContext::new(0)).unwrap();
            node.wait(first).await.unwrap();
            arrived.load(Ordering::SeqCst)
        }
    })
    .await;
    assert!(seen.iter().all(|&n| n == 6), "{seen:?}");
    assert_eq!(arrived.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_back_to_back_barriers() {
    run_collective(4, |mut node| async move {
        for tag in 0..5 {
            let first = node.engine_mut().barrier(OpContext::new(tag)).unwrap();
            let done = node.wait(first).await.unwrap();
            assert_eq!(done.tag, tag);
        }
        assert_eq!(node.engine().active_collectives(), 0);
    })
    .await;
}
