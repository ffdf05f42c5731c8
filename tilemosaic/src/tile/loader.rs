//! Tile loader abstraction for testability.

use std::future::Future;
use std::pin::Pin;

use super::{FetchError, TileData, TileKey};
use crate::store::TileRecord;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for fetching and disposing of tile data.
///
/// This abstraction keeps network access, decoding and worker management
/// outside the orchestration core and allows mock loaders in tests.
///
/// # Call Discipline
///
/// The [`TileStore`](crate::store::TileStore) calls `fetch` at most once per
/// load attempt; concurrent users of the same tile share the resulting
/// future. `abort` is called for loads that are no longer wanted (released
/// before completing, or timed out) and `unload` when a record is freed.
pub trait TileLoader: Send + Sync + 'static {
    /// Start loading the tile.
    ///
    /// The returned future is polled by the store; the configured load
    /// timeout applies from the first poll.
    fn fetch(&self, key: &TileKey) -> BoxFuture<'static, Result<TileData, FetchError>>;

    /// Re-validate previously loaded data after a scene change.
    ///
    /// Called instead of `fetch` when a record still holds data but its load
    /// was invalidated. The default keeps the data as-is.
    fn revalidate(
        &self,
        key: &TileKey,
        data: TileData,
    ) -> BoxFuture<'static, Result<TileData, FetchError>> {
        let _ = key;
        Box::pin(futures::future::ready(Ok(data)))
    }

    /// Abandon an in-flight load for the tile.
    fn abort(&self, key: &TileKey);

    /// Free any loader-side resources held for the record.
    fn unload(&self, record: &TileRecord);
}
