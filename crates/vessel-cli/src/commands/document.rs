//! Document command handlers

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use vessel_core::{SaveReport, Store};

use super::write_and_confirm;
use crate::output::Output;

/// Print the stored document
pub async fn show(store: &Store<Value>, output: &Output) -> Result<()> {
    output.print_document(store.get().await.as_ref());
    Ok(())
}

/// Replace the document
pub async fn set(store: &Store<Value>, raw: &str, output: &Output) -> Result<()> {
    let document = parse_json(raw)?;

    let report = write_and_confirm(store, |s| s.set(document)).await?;
    finish(report, "Document saved", output)
}

/// Merge top-level keys into the document
///
/// Keys the document doesn't already have are ignored and reported.
pub async fn merge(store: &Store<Value>, raw: &str, output: &Output) -> Result<()> {
    let patch = match parse_json(raw)? {
        Value::Object(patch) => patch,
        other => bail!("Merge expects a JSON object, got: {}", other),
    };

    let Some(current) = store.get().await else {
        bail!("No document stored; use `vessel set` to create one first");
    };

    let unknown = unknown_keys(&current, &patch);
    if !unknown.is_empty() {
        output.warning(&format!("Ignoring unknown key(s): {}", unknown.join(", ")));
    }

    let report = write_and_confirm(store, |s| s.mutate(patch)).await?;
    finish(report, "Document merged", output)
}

/// Remove the stored document
pub async fn clear(store: &Store<Value>, output: &Output) -> Result<()> {
    if !store.options().allow_undefined_data {
        bail!("Clearing requires store.allow_undefined_data = true");
    }

    let report = write_and_confirm(store, |s| s.clear()).await?;
    finish(report, "Document cleared", output)
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON: {}", raw))
}

/// Patch keys that `current` doesn't have
fn unknown_keys(current: &Value, patch: &Map<String, Value>) -> Vec<String> {
    match current {
        Value::Object(fields) => patch
            .keys()
            .filter(|key| !fields.contains_key(*key))
            .cloned()
            .collect(),
        _ => patch.keys().cloned().collect(),
    }
}

fn finish(report: SaveReport, message: &str, output: &Output) -> Result<()> {
    match report.outcome {
        Ok(result) => {
            let bytes = result
                .meta
                .as_ref()
                .and_then(|meta| meta.get("bytes"))
                .and_then(Value::as_u64);
            match bytes {
                Some(bytes) if bytes > 0 => {
                    output.success(&format!("{} ({} bytes)", message, bytes))
                }
                _ => output.success(message),
            }
            Ok(())
        }
        Err(e) => bail!("Save failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use serde_json::json;
    use vessel_core::{InMemoryPersistence, OperationError};

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    async fn store_with(adapter: &InMemoryPersistence<Value>, allow: bool) -> Store<Value> {
        let store = Store::builder()
            .persistence(adapter.clone())
            .allow_undefined_data(allow)
            .build()
            .unwrap();
        let _ = store.initialized().await;
        store
    }

    #[tokio::test]
    async fn test_set_replaces_document() {
        let adapter = InMemoryPersistence::with_value(json!({"old": true}));
        let store = store_with(&adapter, false).await;

        set(&store, r#"{"new": 1}"#, &quiet()).await.unwrap();

        assert_eq!(adapter.stored(), Some(json!({"new": 1})));
    }

    #[tokio::test]
    async fn test_set_rejects_invalid_json() {
        let adapter = InMemoryPersistence::new();
        let store = store_with(&adapter, false).await;

        let err = set(&store, "{oops", &quiet()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
        assert!(adapter.saves().is_empty());
    }

    #[tokio::test]
    async fn test_set_empty_document_is_refused() {
        let adapter = InMemoryPersistence::new();
        let store = store_with(&adapter, false).await;

        assert!(set(&store, "\"\"", &quiet()).await.is_err());
        assert!(adapter.saves().is_empty());
    }

    #[tokio::test]
    async fn test_merge_skips_unknown_keys() {
        let adapter = InMemoryPersistence::with_value(json!({"x": 1}));
        let store = store_with(&adapter, false).await;

        merge(&store, r#"{"x": 2, "y": 9}"#, &quiet()).await.unwrap();

        assert_eq!(adapter.stored(), Some(json!({"x": 2})));
    }

    #[tokio::test]
    async fn test_merge_requires_object_and_document() {
        let adapter = InMemoryPersistence::new();
        let store = store_with(&adapter, false).await;

        let err = merge(&store, "[1]", &quiet()).await.unwrap_err();
        assert!(err.to_string().contains("expects a JSON object"));

        let err = merge(&store, r#"{"x": 1}"#, &quiet()).await.unwrap_err();
        assert!(err.to_string().contains("No document stored"));
    }

    #[tokio::test]
    async fn test_clear_needs_permission() {
        let adapter = InMemoryPersistence::with_value(json!({"x": 1}));
        let store = store_with(&adapter, false).await;
        assert!(clear(&store, &quiet()).await.is_err());

        let store = store_with(&adapter, true).await;
        clear(&store, &quiet()).await.unwrap();
        assert_eq!(adapter.stored(), None);
    }

    #[tokio::test]
    async fn test_save_failure_is_reported() {
        let adapter = InMemoryPersistence::new();
        adapter.fail_saves_with(OperationError::new("read-only filesystem"));
        let store = store_with(&adapter, false).await;

        let err = set(&store, "42", &quiet()).await.unwrap_err();
        assert!(err.to_string().contains("read-only filesystem"));
    }

    #[test]
    fn test_unknown_keys() {
        let patch = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();

        assert_eq!(unknown_keys(&json!({"a": 0}), &patch), vec!["b"]);
        assert_eq!(unknown_keys(&json!("scalar"), &patch), vec!["a", "b"]);
    }
}
