//! Ignition document merge.
//!
//! `merge(base, overlay)` follows the Ignition config merge rules closely
//! enough for layering install configs: scalars from the overlay win,
//! objects merge key by key, and lists of keyed entries (units, files,
//! dropins, ...) are unioned by identity with matching entries merged.

use serde_json::{Map, Value};

/// Field identifying an entry in each keyed list, by the list's key.
pub const LIST_IDENTITY: &[(&str, &str)] = &[
    ("units", "name"),
    ("dropins", "name"),
    ("users", "name"),
    ("groups", "name"),
    ("raid", "name"),
    ("luks", "name"),
    ("files", "path"),
    ("directories", "path"),
    ("links", "path"),
    ("disks", "device"),
    ("filesystems", "device"),
    ("partitions", "label"),
    ("merge", "source"),
    ("replace", "source"),
];

fn identity_for(list: &str) -> Option<&'static str> {
    LIST_IDENTITY
        .iter()
        .find(|(name, _)| *name == list)
        .map(|(_, id)| *id)
}

pub fn merge(base: Value, overlay: Value) -> Value {
    merge_value(None, base, overlay)
}

fn merge_value(key: Option<&str>, base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_objects(base, overlay)),
        (Value::Array(base), Value::Array(overlay)) => {
            Value::Array(merge_lists(key.and_then(identity_for), base, overlay))
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_objects(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match base.remove(&key) {
            Some(existing) => merge_value(Some(&key), existing, value),
            None => value,
        };
        base.insert(key, merged);
    }
    base
}

/// Entries whose identity field matches are merged; the rest are appended
/// unless an identical entry is already present.
fn merge_lists(identity: Option<&str>, mut base: Vec<Value>, overlay: Vec<Value>) -> Vec<Value> {
    for value in overlay {
        let id = identity.and_then(|field| Some((field, value.get(field)?.clone())));
        let existing =
            id.and_then(|(field, id)| base.iter().position(|entry| entry.get(field) == Some(&id)));
        match existing {
            Some(idx) => {
                let entry = std::mem::take(&mut base[idx]);
                base[idx] = merge(entry, value);
            }
            None if !base.contains(&value) => base.push(value),
            None => {}
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_win_and_sections_union() {
        let base = json!({
            "ignition": { "version": "3.0.0" },
            "systemd": { "units": [{ "name": "a.service", "enabled": false }] }
        });
        let overlay1 = json!({
            "systemd": { "units": [
                { "name": "b.service", "enabled": true },
                { "name": "a.service", "enabled": true }
            ]}
        });
        let overlay2 = json!({
            "storage": { "files": [{ "path": "/etc/c", "mode": 420 }] }
        });

        let merged = merge(merge(base, overlay1), overlay2);

        assert_eq!(
            merged,
            json!({
                "ignition": { "version": "3.0.0" },
                "systemd": { "units": [
                    { "name": "a.service", "enabled": true },
                    { "name": "b.service", "enabled": true }
                ]},
                "storage": { "files": [{ "path": "/etc/c", "mode": 420 }] }
            })
        );
    }

    #[test]
    fn matching_entries_merge_fields() {
        let base = json!({ "units": [{ "name": "x", "contents": "old", "mask": false }] });
        let overlay = json!({ "units": [{ "name": "x", "contents": "new" }] });
        assert_eq!(
            merge(base, overlay),
            json!({ "units": [{ "name": "x", "contents": "new", "mask": false }] })
        );
    }

    #[test]
    fn null_does_not_erase() {
        let merged = merge(json!({ "a": 1 }), json!({ "a": null }));
        assert_eq!(merged, json!({ "a": 1 }));
    }

    #[test]
    fn plain_lists_append_without_duplicates() {
        let merged = merge(json!({ "keys": ["a", "b"] }), json!({ "keys": ["b", "c"] }));
        assert_eq!(merged, json!({ "keys": ["a", "b", "c"] }));
    }

    #[test]
    fn filesystems_are_keyed_by_device() {
        let base = json!({ "storage": { "filesystems": [
            { "device": "/dev/vda4", "path": "/var", "format": "xfs" }
        ]}});
        let overlay = json!({ "storage": { "filesystems": [
            { "device": "/dev/vdb1", "path": "/var", "format": "ext4" },
            { "device": "/dev/vda4", "wipeFilesystem": true }
        ]}});

        assert_eq!(
            merge(base, overlay),
            json!({ "storage": { "filesystems": [
                { "device": "/dev/vda4", "path": "/var", "format": "xfs", "wipeFilesystem": true },
                { "device": "/dev/vdb1", "path": "/var", "format": "ext4" }
            ]}})
        );
    }

    #[test]
    fn entries_without_identity_are_appended() {
        let base = json!({ "units": [{ "name": "a.service" }] });
        let overlay = json!({ "units": [{ "contents": "orphan" }, { "name": "a.service", "mask": true }] });
        assert_eq!(
            merge(base, overlay),
            json!({ "units": [{ "name": "a.service", "mask": true }, { "contents": "orphan" }] })
        );
    }
}
