use super::types::SourceResult;

/// A core trait that every telemetry source must implement.
///
/// `DataSource` defines the contract for any component that can produce
/// one telemetry sample per publish cycle asynchronously. It is designed
/// to be object-safe when wrapped (see `DynSource`), thread-safe, and
/// usable across async boundaries.
///
/// The trait is marked with `'static` to allow sources to be stored in the
/// global registry without lifetime complications.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// The type of sample this source returns.
    ///
    /// This is typically a `serde_json::Value` for structured readings or
    /// a `Vec<u8>` for opaque frames. It must convert into the bridge's
    /// event data so the wrapped source can feed the publish loop directly.
    type Output: Send + Sync + 'static;

    /// Asynchronously produces the next sample from this source.
    ///
    /// Implementations should perform whatever I/O or computation is needed
    /// (e.g., drawing a random number, grabbing a frame, querying hardware)
    /// and return the result.
    ///
    /// Any error during sampling should be converted into a `SourceError`
    /// and returned via the `SourceResult` type alias.
    async fn sample(&self) -> SourceResult<Self::Output>;
}
