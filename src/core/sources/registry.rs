use std::{collections::HashMap, sync::Arc};

use hivelink_bridge::EventData;
use once_cell::sync::Lazy;

use super::{error::SourceError, traits::DataSource, types::SourceResult};

/// A trait object that all telemetry sources must implement.
/// It allows us to store different source types uniformly in the registry
/// while still being able to sample them dynamically at runtime.
#[async_trait::async_trait]
pub trait DynSource: Send + Sync {
    /// Returns a static string identifying the source.
    /// This name is used when registering and looking up sources.
    fn name(&self) -> &'static str;

    /// Produces the next sample from this source, already converted into
    /// the event data the bridge publishes. The result is wrapped in our
    /// custom `SourceResult` to handle errors uniformly.
    async fn sample_dyn(&self) -> SourceResult<EventData>;
}

/// A small wrapper that turns any concrete type implementing `DataSource`
/// into a type that satisfies the `DynSource` trait object requirements.
pub struct DynWrapper<T> {
    inner: T,
    name: &'static str,
}

impl<T> DynWrapper<T> {
    /// Creates a new wrapper around a concrete source instance.
    pub fn new(name: &'static str, inner: T) -> Self {
        Self { name, inner }
    }
}

#[async_trait::async_trait]
impl<T> DynSource for DynWrapper<T>
where
    T: DataSource + Send + Sync,
    T::Output: Into<EventData>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    /// Delegates the actual sampling to the wrapped source, then converts
    /// the typed output into event data for the publish loop.
    async fn sample_dyn(&self) -> SourceResult<EventData> {
        let output = self.inner.sample().await?;
        Ok(output.into())
    }
}

/// Metadata for a single source that will be submitted to the global inventory.
/// Each source provides a name and a factory function that creates an `Arc<dyn DynSource>`.
pub struct SourceMeta {
    pub name: &'static str,
    pub factory: fn() -> Arc<dyn DynSource>,
}

// Tell the `inventory` crate to collect all submitted `SourceMeta` values.
inventory::collect!(SourceMeta);

/// The central registry that holds all registered telemetry sources.
/// It is built once at startup and then used throughout the application.
pub struct SourceRegistry {
    sources: HashMap<&'static str, Arc<dyn DynSource>>,
}

impl SourceRegistry {
    /// Constructs a new registry by iterating over all submitted `SourceMeta`
    /// entries (via the `inventory` crate) and instantiating each source.
    pub fn new() -> Self {
        let mut sources = HashMap::new();

        for meta in inventory::iter::<SourceMeta> {
            let source = (meta.factory)();
            sources.insert(meta.name, source);
        }

        SourceRegistry { sources }
    }

    /// Retrieves a source by name. Returns an error if no source with that name exists.
    pub fn get(&self, name: &str) -> SourceResult<Arc<dyn DynSource>> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::SourceNotFound(name.to_string()))
    }

    /// Returns a list of all registered source names.
    pub fn list_names(&self) -> Vec<&'static str> {
        self.sources.keys().copied().collect()
    }

    /// Checks whether a source with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True if no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns a reference to the global singleton registry.
    /// The registry is built lazily the first time this method is called.
    pub fn global() -> &'static SourceRegistry {
        &GLOBAL_REGISTRY
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The lazily-initialized global registry instance.
/// `once_cell::sync::Lazy` ensures it is constructed only once, even in a multi-threaded context.
static GLOBAL_REGISTRY: Lazy<SourceRegistry> = Lazy::new(SourceRegistry::new);

/// Convenience facade that forwards calls to the global registry.
/// This is the API most application code will use.
pub struct Sources;

impl Sources {
    pub fn get(name: &str) -> SourceResult<Arc<dyn DynSource>> {
        SourceRegistry::global().get(name)
    }

    pub fn list() -> Vec<&'static str> {
        SourceRegistry::global().list_names()
    }

    pub fn exists(name: &str) -> bool {
        SourceRegistry::global().contains(name)
    }

    pub fn count() -> usize {
        SourceRegistry::global().len()
    }
}

/// Macro used by source implementations to register themselves
/// with the global inventory at compile time.
#[macro_export]
macro_rules! register_source {
    ($source_type:ty, $name:expr) => {
        inventory::submit! {
            $crate::core::sources::registry::SourceMeta {
                name: $name,
                factory: || {
                    std::sync::Arc::new(
                        $crate::core::sources::registry::DynWrapper::new(
                            $name,
                            <$source_type>::default(),
                        )
                    )
                },
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct TestReadingSource;

    #[async_trait]
    impl DataSource for TestReadingSource {
        type Output = serde_json::Value;

        async fn sample(&self) -> SourceResult<Self::Output> {
            Ok(json!({ "value": 42.5 }))
        }
    }

    #[derive(Default)]
    struct TestFrameSource;

    #[async_trait]
    impl DataSource for TestFrameSource {
        type Output = Vec<u8>;

        async fn sample(&self) -> SourceResult<Self::Output> {
            Ok(vec![0xAA, 0xBB, 0xCC])
        }
    }

    fn create_test_registry() -> SourceRegistry {
        let mut sources: HashMap<&'static str, Arc<dyn DynSource>> = HashMap::new();

        let reading: Arc<dyn DynSource> =
            Arc::new(DynWrapper::new("test_reading", TestReadingSource));
        let frame: Arc<dyn DynSource> = Arc::new(DynWrapper::new("test_frame", TestFrameSource));

        sources.insert("test_reading", reading);
        sources.insert("test_frame", frame);

        SourceRegistry { sources }
    }

    #[test]
    fn test_registry_operations() {
        let registry = create_test_registry();

        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());

        let reading = registry.get("test_reading").expect("source should exist");
        assert_eq!(reading.name(), "test_reading");

        let result = registry.get("non_existent");
        assert!(matches!(result, Err(SourceError::SourceNotFound(_))));

        if let Err(SourceError::SourceNotFound(name)) = result {
            assert_eq!(name, "non_existent");
        }
    }

    #[test]
    fn test_list_names_and_contains() {
        let registry = create_test_registry();
        let names = registry.list_names();

        assert_eq!(names.len(), 2);
        assert!(names.contains(&"test_reading"));
        assert!(names.contains(&"test_frame"));

        assert!(registry.contains("test_reading"));
        assert!(!registry.contains("test_temperature"));
    }

    #[test]
    fn test_global_registry_is_singleton() {
        let registry1 = SourceRegistry::global();
        let registry2 = SourceRegistry::global();

        assert_eq!(registry1 as *const _, registry2 as *const _);
    }

    #[tokio::test]
    async fn test_dyn_wrapper_converts_json_output() {
        let wrapper = DynWrapper::new("test_reading", TestReadingSource);

        assert_eq!(wrapper.name(), "test_reading");

        let data = wrapper.sample_dyn().await.expect("should produce a sample");
        assert_eq!(data, EventData::Json(json!({ "value": 42.5 })));
    }

    #[tokio::test]
    async fn test_dyn_wrapper_converts_frame_output() {
        let wrapper = DynWrapper::new("test_frame", TestFrameSource);

        let data = wrapper.sample_dyn().await.expect("should produce a sample");
        assert_eq!(data, EventData::Raw(vec![0xAA, 0xBB, 0xCC]));
    }

    mod macro_tests {
        use super::*;
        #[allow(unused_imports)]
        use crate::register_source;

        #[derive(Default)]
        struct MacroTestSource;

        #[async_trait]
        impl DataSource for MacroTestSource {
            type Output = Vec<u8>;

            async fn sample(&self) -> SourceResult<Vec<u8>> {
                Ok(b"macro_test".to_vec())
            }
        }

        register_source!(MacroTestSource, "macro_test");

        #[test]
        fn test_register_source_macro() {
            let registry = SourceRegistry::new();
            assert!(registry.contains("macro_test"));
        }
    }
}
