//! Shared breakpoint set, keyed by (absolute file, line)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tether_foundation::{Error, Result};

/// A source breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Absolute, lexically normalized path
    pub file: PathBuf,
    /// 1-based line
    pub line: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Adapter-interpreted hit count expression, e.g. `>= 3`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Logpoint message; the adapter logs instead of stopping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Breakpoint {
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            enabled: true,
            condition: None,
            hit_condition: None,
            log_message: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_hit_condition(mut self, hit_condition: impl Into<String>) -> Self {
        self.hit_condition = Some(hit_condition.into());
        self
    }

    pub fn with_log_message(mut self, log_message: impl Into<String>) -> Self {
        self.log_message = Some(log_message.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn to_protocol(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("line".to_string(), json!(self.line));
        let optional = [
            ("condition", &self.condition),
            ("hitCondition", &self.hit_condition),
            ("logMessage", &self.log_message),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                entry.insert(key.to_string(), json!(value));
            }
        }
        Value::Object(entry)
    }
}

/// Absolute path with `.` and `..` folded away; relative paths are rejected
pub fn normalize_path(file: &Path) -> Result<PathBuf> {
    if !file.is_absolute() {
        return Err(Error::InvalidInput(format!(
            "Breakpoint file must be an absolute path: {}",
            file.display()
        )));
    }
    let mut normalized = PathBuf::new();
    for component in file.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Thread-safe breakpoint set shared by every session
#[derive(Debug, Default)]
pub struct BreakpointStore {
    breakpoints: RwLock<BTreeMap<(PathBuf, u32), Breakpoint>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the breakpoint at its (file, line).
    /// Returns the stored breakpoint and whether the key is new.
    pub fn add(&self, breakpoint: Breakpoint) -> Result<(Breakpoint, bool)> {
        if breakpoint.line == 0 {
            return Err(Error::InvalidInput("Breakpoint lines start at 1".to_string()));
        }
        let breakpoint = Breakpoint {
            file: normalize_path(&breakpoint.file)?,
            condition: non_blank(breakpoint.condition),
            hit_condition: non_blank(breakpoint.hit_condition),
            log_message: non_blank(breakpoint.log_message),
            ..breakpoint
        };
        let previous = self
            .breakpoints
            .write()
            .insert((breakpoint.file.clone(), breakpoint.line), breakpoint.clone());
        Ok((breakpoint, previous.is_none()))
    }

    pub fn remove(&self, file: &Path, line: u32) -> Result<Breakpoint> {
        let file = normalize_path(file)?;
        self.breakpoints
            .write()
            .remove(&(file.clone(), line))
            .ok_or_else(|| {
                Error::NotFound(format!("Breakpoint {}:{}", file.display(), line))
            })
    }

    /// Full set, ordered by file then line
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.read().values().cloned().collect()
    }

    /// Every breakpoint in `file`, an already normalized path
    pub fn for_file(&self, file: &Path) -> Vec<Breakpoint> {
        self.breakpoints
            .read()
            .values()
            .filter(|b| b.file == file)
            .cloned()
            .collect()
    }

    /// Files that currently have at least one breakpoint
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .breakpoints
            .read()
            .keys()
            .map(|(file, _)| file.clone())
            .collect();
        files.dedup();
        files
    }

    pub fn len(&self) -> usize {
        self.breakpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.read().is_empty()
    }
}

/// Arguments of a `setBreakpoints` request replacing every breakpoint in `file`.
/// Disabled breakpoints are left out, which clears them in the adapter.
pub fn set_breakpoints_arguments(file: &Path, breakpoints: &[Breakpoint]) -> Value {
    let active: Vec<&Breakpoint> = breakpoints.iter().filter(|b| b.enabled).collect();
    let entries: Vec<Value> = active.iter().map(|b| b.to_protocol()).collect();
    let lines: Vec<u32> = active.iter().map(|b| b.line).collect();

    json!({
        "source": {
            "path": file.to_string_lossy(),
            "name": file.file_name().map(|n| n.to_string_lossy().into_owned()),
        },
        "breakpoints": entries,
        "lines": lines,
        "sourceModified": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent_and_updates_condition() {
        let store = BreakpointStore::new();
        let (_, added) = store.add(Breakpoint::new("/src/main.rs", 10)).unwrap();
        assert!(added);

        let (bp, added) = store
            .add(Breakpoint::new("/src/main.rs", 10).with_condition("x > 3"))
            .unwrap();
        assert!(!added);
        assert_eq!(bp.condition.as_deref(), Some("x > 3"));
        assert!(bp.enabled);
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].condition.as_deref(), Some("x > 3"));
    }

    #[test]
    fn test_remove() {
        let store = BreakpointStore::new();
        store.add(Breakpoint::new("/p/a.rs", 1)).unwrap();
        store.add(Breakpoint::new("/p/a.rs", 2)).unwrap();
        store.add(Breakpoint::new("/p/b.rs", 1)).unwrap();

        assert_eq!(store.files(), vec![PathBuf::from("/p/a.rs"), PathBuf::from("/p/b.rs")]);
        store.remove(Path::new("/p/a.rs"), 1).unwrap();
        assert_eq!(store.for_file(Path::new("/p/a.rs")).len(), 1);

        let err = store.remove(Path::new("/p/a.rs"), 1).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_invalid_input_rejected() {
        let store = BreakpointStore::new();
        assert!(matches!(
            store.add(Breakpoint::new("/p/a.rs", 0)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.add(Breakpoint::new("a.rs", 3)),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            store.remove(Path::new("a.rs"), 3),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_paths_share_a_key_once_normalized() {
        let store = BreakpointStore::new();
        let (first, _) = store.add(Breakpoint::new("/x/./src/a.rs", 5)).unwrap();
        assert_eq!(first.file, PathBuf::from("/x/src/a.rs"));

        let (_, added) = store
            .add(Breakpoint::new("/x/lib/../src/a.rs", 5).with_log_message("hit"))
            .unwrap();
        assert!(!added);
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].log_message.as_deref(), Some("hit"));

        store.remove(Path::new("/x/src/./a.rs"), 5).unwrap();
        assert!(store.is_empty());

        assert_eq!(normalize_path(Path::new("/../a.rs")).unwrap(), PathBuf::from("/a.rs"));
    }

    #[test]
    fn test_blank_options_dropped() {
        let store = BreakpointStore::new();
        let (bp, _) = store
            .add(
                Breakpoint::new("/p/a.rs", 1)
                    .with_condition(" ")
                    .with_hit_condition("")
                    .with_log_message("\t"),
            )
            .unwrap();
        assert_eq!(bp, Breakpoint::new("/p/a.rs", 1));
    }

    #[test]
    fn test_set_breakpoints_arguments() {
        let breakpoints = vec![
            Breakpoint::new("/src/app.py", 4),
            Breakpoint::new("/src/app.py", 9)
                .with_condition("n == 2")
                .with_hit_condition(">= 3"),
            Breakpoint::new("/src/app.py", 12).with_log_message("n is {n}"),
            Breakpoint::new("/src/app.py", 15).enabled(false),
        ];
        let args = set_breakpoints_arguments(Path::new("/src/app.py"), &breakpoints);
        assert_eq!(args["source"]["path"], "/src/app.py");
        assert_eq!(args["source"]["name"], "app.py");
        assert_eq!(args["lines"], json!([4, 9, 12]));
        assert_eq!(args["breakpoints"][0], json!({ "line": 4 }));
        assert_eq!(
            args["breakpoints"][1],
            json!({ "line": 9, "condition": "n == 2", "hitCondition": ">= 3" })
        );
        assert_eq!(args["breakpoints"][2]["logMessage"], "n is {n}");
    }

    #[test]
    fn test_breakpoint_json_defaults_enabled() {
        let bp: Breakpoint =
            serde_json::from_value(json!({ "file": "/p/a.rs", "line": 2, "hitCondition": "5" }))
                .unwrap();
        assert!(bp.enabled);
        assert_eq!(bp.hit_condition.as_deref(), Some("5"));

        let json = serde_json::to_value(Breakpoint::new("/p/a.rs", 2).enabled(false)).unwrap();
        assert_eq!(json, json!({ "file": "/p/a.rs", "line": 2, "enabled": false }));
    }
}
