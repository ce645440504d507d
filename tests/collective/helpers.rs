use collex::{CollexConfig, CollexError, LocalCluster, LocalNode};
use std::future::Future;

/// Run `f` on every rank of an `nproc`-rank in-process cluster.
/// Outputs come back in rank order; a panic on any rank fails the test.
pub async fn run_collective<F, Fut, R>(nproc: u32, f: F) -> Vec<R>
where
    F: Fn(LocalNode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    run_with_config(nproc, CollexConfig::default(), f).await
}

pub async fn run_with_config<F, Fut, R>(nproc: u32, config: CollexConfig, f: F) -> Vec<R>
where
    F: Fn(LocalNode) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    LocalCluster::run(nproc, config, move |node| {
        let fut = f(node);
        async move { Ok::<R, CollexError>(fut.await) }
    })
    .await
    .unwrap()
}

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn from_i32_bytes(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
