use crate::error::{Error, Result};
use crate::paths;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

// ============================================================================
// JSON Parsing Utilities
// ============================================================================

pub(crate) fn from_str<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s)
        .map_err(|e| Error::validation_invalid_json(e, Some("parse json".to_string())))
}

pub(crate) fn to_string_pretty<T: Serialize>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize json".to_string())))
}

/// Read JSON spec from string, file (@path), or stdin (-).
pub fn read_json_spec_to_string(spec: &str) -> Result<String> {
    use std::io::IsTerminal;

    if spec.trim() == "-" {
        let mut buf = String::new();
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            return Err(Error::validation_invalid_argument(
                "json",
                "Cannot read JSON from stdin when stdin is a TTY",
                None,
                None,
            ));
        }
        stdin
            .read_to_string(&mut buf)
            .map_err(|e| Error::internal_io(e.to_string(), Some("read stdin".to_string())))?;
        return Ok(buf);
    }

    if let Some(path) = spec.strip_prefix('@') {
        if path.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "json",
                "Invalid JSON spec '@' (missing file path)",
                None,
                None,
            ));
        }

        return fs::read_to_string(path)
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("read {}", path))));
    }

    Ok(spec.to_string())
}

// ============================================================================
// Entity Storage
// ============================================================================

/// A record persisted as `<root>/<dir_name>/<id>.json`.
pub trait ConfigEntity: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn dir_name() -> &'static str;
    fn entity_type() -> &'static str;
    fn not_found_error(id: String, suggestions: Vec<String>) -> Error;

    /// Entity-specific validation, run before every save.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn entity_path<T: ConfigEntity>(root: &Path, id: &str) -> PathBuf {
    paths::entity_file(root, T::dir_name(), id)
}

pub(crate) fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !id.starts_with('.');

    if !valid {
        return Err(Error::validation_invalid_argument(
            "id",
            format!(
                "Invalid id '{}': use letters, digits, '-', '_' or '.'",
                id
            ),
            Some(id.to_string()),
            None,
        ));
    }
    Ok(())
}

pub(crate) fn load<T: ConfigEntity>(root: &Path, id: &str) -> Result<T> {
    let path = entity_path::<T>(root, id);
    if !path.exists() {
        let suggestions = find_similar_ids::<T>(root, id);
        return Err(T::not_found_error(id.to_string(), suggestions));
    }
    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;
    let mut entity: T = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;
    entity.set_id(id.to_string());
    Ok(entity)
}

pub(crate) fn list<T: ConfigEntity>(root: &Path) -> Result<Vec<T>> {
    let mut items: Vec<T> = list_ids::<T>(root)?
        .into_iter()
        .filter_map(|id| match load::<T>(root, &id) {
            Ok(entity) => Some(entity),
            Err(err) => {
                log::warn!("Skipping {} '{}': {}", T::entity_type(), id, err);
                None
            }
        })
        .collect();
    items.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(items)
}

pub(crate) fn list_ids<T: ConfigEntity>(root: &Path) -> Result<Vec<String>> {
    let dir = paths::entity_dir(root, T::dir_name());
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(&dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("list {}", dir.display())))
    })?;

    let mut ids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    ids.sort();
    Ok(ids)
}

pub(crate) fn exists<T: ConfigEntity>(root: &Path, id: &str) -> bool {
    entity_path::<T>(root, id).exists()
}

pub(crate) fn save<T: ConfigEntity>(root: &Path, entity: &T) -> Result<()> {
    validate_id(entity.id())?;
    entity.validate()?;

    let path = entity_path::<T>(root, entity.id());
    let content = to_string_pretty(entity)?;
    write_atomic(&path, &content)
}

pub(crate) fn delete<T: ConfigEntity>(root: &Path, id: &str) -> Result<()> {
    let path = entity_path::<T>(root, id);
    if !path.exists() {
        let suggestions = find_similar_ids::<T>(root, id);
        return Err(T::not_found_error(id.to_string(), suggestions));
    }
    fs::remove_file(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
    })
}

/// Create a record from a JSON object carrying its own `id`.
pub(crate) fn create<T: ConfigEntity>(root: &Path, json_spec: &str) -> Result<T> {
    let raw = read_json_spec_to_string(json_spec)?;
    let value: Value = from_str(&raw)?;

    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::validation_invalid_argument("id", "Missing required field: id", None, None)
        })?
        .to_string();

    validate_id(&id)?;
    if exists::<T>(root, &id) {
        return Err(Error::validation_invalid_argument(
            format!("{}.id", T::entity_type()),
            format!("{} '{}' already exists", T::entity_type(), id),
            Some(id),
            None,
        ));
    }

    let mut entity: T = serde_json::from_value(value)
        .map_err(|e| Error::validation_invalid_argument("json", e.to_string(), None, None))?;
    entity.set_id(id);
    save(root, &entity)?;
    Ok(entity)
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub id: String,
    pub updated_fields: Vec<String>,
}

/// Apply a JSON merge patch to a stored record. `null` removes a field.
pub(crate) fn merge<T: ConfigEntity>(root: &Path, id: &str, json_spec: &str) -> Result<MergeResult> {
    let raw = read_json_spec_to_string(json_spec)?;
    let patch: Value = from_str(&raw)?;
    let Value::Object(patch_obj) = patch else {
        return Err(Error::validation_invalid_argument(
            "json",
            "Merge patch must be a JSON object",
            Some(id.to_string()),
            None,
        ));
    };

    let entity: T = load(root, id)?;
    let mut current = serde_json::to_value(&entity)
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize record".to_string())))?;

    let mut updated_fields = Vec::new();
    for (key, value) in patch_obj {
        if key == "id" {
            continue;
        }
        merge_value(&mut current, &key, value);
        updated_fields.push(key);
    }

    let mut merged: T = serde_json::from_value(current)
        .map_err(|e| Error::validation_invalid_argument("json", e.to_string(), Some(id.to_string()), None))?;
    merged.set_id(id.to_string());
    save(root, &merged)?;

    Ok(MergeResult {
        id: id.to_string(),
        updated_fields,
    })
}

fn merge_value(target: &mut Value, key: &str, patch: Value) {
    let Value::Object(map) = target else {
        return;
    };

    match patch {
        Value::Null => {
            map.remove(key);
        }
        Value::Object(patch_obj) => {
            let slot = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(serde_json::Map::new());
            }
            for (child_key, child_value) in patch_obj {
                merge_value(slot, &child_key, child_value);
            }
        }
        other => {
            map.insert(key.to_string(), other);
        }
    }
}

/// Write through a sibling temp file and rename, so readers never see a torn record.
pub(crate) fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some("write file".to_string()),
        )
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| Error::internal_io(e.to_string(), Some("create directory".to_string())))?;

    let filename = path.file_name().ok_or_else(|| {
        Error::internal_io(
            format!("Invalid path: {}", path.display()),
            Some("write file".to_string()),
        )
    })?;
    let tmp_path = parent.join(format!("{}.tmp", filename.to_string_lossy()));

    fs::write(&tmp_path, content)
        .map_err(|e| Error::internal_io(e.to_string(), Some("write temp file".to_string())))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| Error::internal_io(e.to_string(), Some("rename temp file".to_string())))
}

pub(crate) fn find_similar_ids<T: ConfigEntity>(root: &Path, target: &str) -> Vec<String> {
    let target = target.to_lowercase();
    let prefix: String = target.chars().take(3).collect();
    list_ids::<T>(root)
        .unwrap_or_default()
        .into_iter()
        .filter(|id| {
            let id = id.to_lowercase();
            id.contains(&target) || target.contains(&id) || id.starts_with(&prefix)
        })
        .take(5)
        .collect()
}
