//! Model values
//!
//! A [`Model`] is the single piece of state a [`Store`](crate::Store) holds.
//! Each model names its own partial-update type ([`Model::Patch`]) and decides
//! how a patch is merged. The merge never creates fields that the current
//! value does not already have: keys that do not exist are reported back in
//! the [`MergeReport`] and left out.
//!
//! Implementations are provided for `serde_json::Value`, `BTreeMap<String, V>`
//! and `HashMap<String, V>`. Plain structs get one through [`model_patch!`],
//! which generates an optional-field patch struct so that field existence is
//! checked by the compiler.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

/// Outcome of merging a patch into a model value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Keys that were written, in patch order
    pub applied: Vec<String>,
    /// Keys that do not exist on the value and were left out
    pub skipped: Vec<String>,
}

impl MergeReport {
    /// True when every key in the patch was applied
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// A value that can live inside a [`Store`](crate::Store)
///
/// `Default` provides the placeholder handed out by the readiness signal when
/// initialization does not load anything.
pub trait Model: Clone + Default + Send + Sync + 'static {
    /// Partial update accepted by [`Store::mutate`](crate::Store::mutate)
    type Patch: Send + 'static;

    /// Whether this value counts as empty
    ///
    /// Empty values are rejected by every write path unless the store allows
    /// undefined data.
    fn is_empty(&self) -> bool {
        false
    }

    /// Overwrite existing keys with the values in `patch`
    ///
    /// Must not add keys that `self` does not already have.
    fn merge(&mut self, patch: Self::Patch) -> MergeReport;
}

/// JSON documents
///
/// `null`, `false`, `0` and `""` are empty. Merging only touches objects; a
/// patch applied to any other kind of value skips every key.
impl Model for Value {
    type Patch = Map<String, Value>;

    fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(_) | Value::Object(_) => false,
        }
    }

    fn merge(&mut self, patch: Self::Patch) -> MergeReport {
        let mut report = MergeReport::default();
        let Value::Object(fields) = self else {
            report.skipped = patch.into_iter().map(|(key, _)| key).collect();
            return report;
        };

        for (key, value) in patch {
            match fields.get_mut(&key) {
                Some(slot) => {
                    *slot = value;
                    report.applied.push(key);
                }
                None => report.skipped.push(key),
            }
        }
        report
    }
}

/// Ordered maps, patched with an ordered list of setters
impl<V> Model for BTreeMap<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    type Patch = Vec<(String, V)>;

    fn merge(&mut self, patch: Self::Patch) -> MergeReport {
        let mut report = MergeReport::default();
        for (key, value) in patch {
            match self.get_mut(&key) {
                Some(slot) => {
                    *slot = value;
                    report.applied.push(key);
                }
                None => report.skipped.push(key),
            }
        }
        report
    }
}

/// Hash maps, patched with an ordered list of setters
impl<V> Model for HashMap<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    type Patch = Vec<(String, V)>;

    fn merge(&mut self, patch: Self::Patch) -> MergeReport {
        let mut report = MergeReport::default();
        for (key, value) in patch {
            match self.get_mut(&key) {
                Some(slot) => {
                    *slot = value;
                    report.applied.push(key);
                }
                None => report.skipped.push(key),
            }
        }
        report
    }
}

/// Implement [`Model`] for a struct and generate its patch type
///
/// Every listed field becomes an `Option` on the patch struct; `Some` fields
/// overwrite the model's field on merge. Attributes placed before `struct`
/// are applied to the generated patch.
///
/// ```
/// use vessel_core::model_patch;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// pub struct Settings {
///     pub theme: String,
///     pub font_size: u32,
/// }
///
/// model_patch! {
///     #[derive(Debug, Clone)]
///     pub struct SettingsPatch for Settings {
///         theme: String,
///         font_size: u32,
///     }
/// }
///
/// let patch = SettingsPatch { font_size: Some(14), ..Default::default() };
/// # let _ = patch;
/// ```
#[macro_export]
macro_rules! model_patch {
    (
        $(#[$meta:meta])*
        $vis:vis struct $patch:ident for $model:ty {
            $($field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Default)]
        $vis struct $patch {
            $(pub $field: ::std::option::Option<$fty>,)*
        }

        impl $crate::Model for $model {
            type Patch = $patch;

            fn merge(&mut self, patch: Self::Patch) -> $crate::MergeReport {
                let mut report = $crate::MergeReport::default();
                $(
                    if let ::std::option::Option::Some(value) = patch.$field {
                        self.$field = value;
                        report.applied.push(::std::stringify!($field).to_string());
                    }
                )*
                report
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Profile {
        name: String,
        age: u32,
    }

    model_patch! {
        #[derive(Debug, Clone)]
        struct ProfilePatch for Profile {
            name: String,
            age: u32,
        }
    }

    #[test]
    fn test_json_emptiness() {
        assert!(Value::Null.is_empty());
        assert!(json!(false).is_empty());
        assert!(json!(0).is_empty());
        assert!(json!(0.0).is_empty());
        assert!(json!("").is_empty());

        assert!(!json!(true).is_empty());
        assert!(!json!(3).is_empty());
        assert!(!json!("x").is_empty());
        assert!(!json!({}).is_empty());
        assert!(!json!([]).is_empty());
    }

    #[test]
    fn test_json_merge_overwrites_existing_keys_only() {
        let mut value = json!({"x": 1, "z": "keep"});
        let report = value.merge(object(json!({"x": 2, "y": 9})));

        assert_eq!(value, json!({"x": 2, "z": "keep"}));
        assert_eq!(report.applied, vec!["x".to_string()]);
        assert_eq!(report.skipped, vec!["y".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_json_merge_into_non_object_skips_everything() {
        let mut value = json!([1, 2, 3]);
        let report = value.merge(object(json!({"a": 1})));

        assert_eq!(value, json!([1, 2, 3]));
        assert!(report.applied.is_empty());
        assert_eq!(report.skipped, vec!["a".to_string()]);
    }

    #[test]
    fn test_json_merge_replaces_nested_values_wholesale() {
        let mut value = json!({"inner": {"a": 1, "b": 2}});
        value.merge(object(json!({"inner": {"c": 3}})));

        assert_eq!(value, json!({"inner": {"c": 3}}));
    }

    #[test]
    fn test_btreemap_merge() {
        let mut map = BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
        let report = map.merge(vec![("b".to_string(), 20), ("c".to_string(), 30)]);

        assert_eq!(map.get("b"), Some(&20));
        assert!(!map.contains_key("c"));
        assert_eq!(report.skipped, vec!["c".to_string()]);
        assert!(!map.is_empty());
    }

    #[test]
    fn test_hashmap_merge_applies_in_patch_order() {
        let mut map = HashMap::from([("k".to_string(), "old".to_string())]);
        let report = map.merge(vec![
            ("k".to_string(), "first".to_string()),
            ("k".to_string(), "second".to_string()),
        ]);

        assert_eq!(map["k"], "second");
        assert_eq!(report.applied.len(), 2);
        assert!(report.is_clean());
    }

    #[test]
    fn test_struct_patch_merge() {
        let mut profile = Profile {
            name: "ada".to_string(),
            age: 36,
        };
        let report = profile.merge(ProfilePatch {
            age: Some(37),
            ..Default::default()
        });

        assert_eq!(profile.name, "ada");
        assert_eq!(profile.age, 37);
        assert_eq!(report.applied, vec!["age".to_string()]);
        assert!(report.is_clean());
        assert!(!Model::is_empty(&profile));
    }
}
