// Configuration loading, reload callbacks, and apply idempotence.
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use modulith_extension_sdk::{Extension, ExtensionError, ExtensionMetadata};
use modulith_host::config::HostConfig;
use modulith_host::config_watcher::ConfigWatcher;

use crate::helpers::new_registry;

struct CountingConfigExtension {
    name: String,
    applied: Mutex<Vec<Value>>,
}

impl CountingConfigExtension {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            applied: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait::async_trait]
impl Extension for CountingConfigExtension {
    fn metadata(&self) -> ExtensionMetadata {
        ExtensionMetadata::new(&self.name, "1.0.0")
    }

    fn validate_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        if raw.get("invalid").is_some() {
            return Err(ExtensionError::config("invalid flag set"));
        }
        Ok(())
    }

    async fn apply_config(&self, raw: &Value) -> Result<(), ExtensionError> {
        self.applied.lock().unwrap().push(raw.clone());
        Ok(())
    }
}

#[tokio::test]
async fn apply_config_runs_validate_then_apply_then_callback() {
    let registry = new_registry();
    let extension = Arc::new(CountingConfigExtension::new("configurable"));
    registry
        .register(Arc::clone(&extension) as Arc<dyn Extension>)
        .await
        .unwrap();

    let callback_seen = Arc::new(Mutex::new(Vec::<Value>::new()));
    let seen = Arc::clone(&callback_seen);
    registry.set_reload_callback(
        "configurable",
        Arc::new(move |value| {
            seen.lock().unwrap().push(value.clone());
        }),
    );

    registry
        .apply_config("configurable", json!({"level": 1}))
        .await
        .unwrap();

    assert_eq!(extension.applied.lock().unwrap().len(), 1);
    // The callback receives the same bytes that were applied.
    assert_eq!(*callback_seen.lock().unwrap(), vec![json!({"level": 1})]);

    // Validation failures apply nothing and fire no callback.
    let err = registry
        .apply_config("configurable", json!({"invalid": true}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid flag set"));
    assert_eq!(extension.applied.lock().unwrap().len(), 1);
    assert_eq!(callback_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn apply_config_twice_equals_apply_once() {
    let registry = new_registry();
    let extension = Arc::new(CountingConfigExtension::new("configurable"));
    registry
        .register(Arc::clone(&extension) as Arc<dyn Extension>)
        .await
        .unwrap();

    let subtree = json!({"workers": 4, "buffer": 64});
    registry
        .apply_config("configurable", subtree.clone())
        .await
        .unwrap();
    registry
        .apply_config("configurable", subtree.clone())
        .await
        .unwrap();

    // Both applies delivered the identical value; the extension converges to
    // the same state either way.
    let applied = extension.applied.lock().unwrap().clone();
    assert_eq!(applied, vec![subtree.clone(), subtree]);
}

#[tokio::test]
async fn boot_enablement_applies_config_subtrees() {
    let registry = new_registry();
    let extension = Arc::new(CountingConfigExtension::new("configurable"));
    registry
        .register(Arc::clone(&extension) as Arc<dyn Extension>)
        .await
        .unwrap();

    let config = HostConfig::parse(
        r#"
enabled:
  configurable: true
config:
  configurable:
    level: 7
"#,
    )
    .unwrap();

    registry.enable_from_config(&config).await.unwrap();
    let applied = extension.applied.lock().unwrap().clone();
    assert_eq!(applied, vec![json!({"level": 7})]);
}

#[tokio::test]
async fn watcher_reload_reapplies_subtrees_from_disk() {
    let registry = new_registry();
    let extension = Arc::new(CountingConfigExtension::new("configurable"));
    registry
        .register(Arc::clone(&extension) as Arc<dyn Extension>)
        .await
        .unwrap();

    let path = std::env::temp_dir().join(format!(
        "modulith-reload-{}.json",
        uuid::Uuid::new_v4()
    ));
    // JSON works just as well as YAML.
    std::fs::write(&path, r#"{"config": {"configurable": {"level": 2}}}"#).unwrap();

    let watcher = ConfigWatcher::new(&path, Arc::clone(&registry));
    watcher.reload_once().await.unwrap();

    let applied = extension.applied.lock().unwrap().clone();
    assert_eq!(applied, vec![json!({"level": 2})]);
    std::fs::remove_file(path).ok();
}
