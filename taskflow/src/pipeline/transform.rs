//! Transform trait applied by each pipeline stage.

use async_trait::async_trait;

use crate::error::EngineResult;

/// Per-value transformation run by a [`Stage`](super::Stage).
///
/// Returning an error drops that value; the stage logs it, counts it as
/// failed and keeps going.
#[async_trait]
pub trait Transform<T: Send + 'static>: Send + Sync {
    async fn apply(&self, value: T) -> EngineResult<T>;
}

/// Infallible synchronous transform.
pub(crate) struct MapFn<F>(pub(crate) F);

#[async_trait]
impl<T, F> Transform<T> for MapFn<F>
where
    T: Send + 'static,
    F: Fn(T) -> T + Send + Sync,
{
    async fn apply(&self, value: T) -> EngineResult<T> {
        Ok((self.0)(value))
    }
}

/// Fallible synchronous transform.
pub(crate) struct TryMapFn<F>(pub(crate) F);

#[async_trait]
impl<T, F> Transform<T> for TryMapFn<F>
where
    T: Send + 'static,
    F: Fn(T) -> EngineResult<T> + Send + Sync,
{
    async fn apply(&self, value: T) -> EngineResult<T> {
        (self.0)(value)
    }
}
