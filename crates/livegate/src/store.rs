use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use livegate_core::store::validate_name;
use livegate_core::{Signature, StoreError, UserRecord, UserStore};

/// User database kept as a single JSON object: `{name: {signature, created_at}}`.
///
/// Every operation re-reads the file, so edits made by another process (for
/// example `livegate users remove`) are picked up. Writes go to a sibling
/// temp file that is renamed over the database.
#[derive(Debug, Clone)]
pub struct JsonUserStore {
    path: PathBuf,
}

impl JsonUserStore {
    /// Open the database, creating an empty one (and its directory) if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !store.path.exists() {
            store.save(&BTreeMap::new())?;
            tracing::info!(path = %store.path.display(), "created user database");
        } else {
            // Fail at open rather than at the end of a session.
            store.load()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(BTreeMap::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, users: &BTreeMap<String, UserRecord>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(users)
            .map_err(|e| StoreError::Corrupt(format!("failed to encode users: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl UserStore for JsonUserStore {
    fn register(&mut self, name: &str, signature: Signature) -> Result<(), StoreError> {
        let name = validate_name(name)?;
        let mut users = self.load()?;
        let replaced = users
            .insert(
                name.to_string(),
                UserRecord {
                    signature,
                    created_at: Utc::now(),
                },
            )
            .is_some();
        self.save(&users)?;
        tracing::info!(user = name, replaced, total = users.len(), "user registered");
        Ok(())
    }

    fn get_all(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        self.load()
    }

    fn remove(&mut self, name: &str) -> Result<bool, StoreError> {
        let name = name.trim();
        let mut users = self.load()?;
        if users.remove(name).is_none() {
            return Ok(false);
        }
        self.save(&users)?;
        tracing::info!(user = name, "user removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("livegate-store-{tag}-{nanos}"))
            .join("users.json")
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_open_creates_empty_database() {
        let path = temp_db("create");
        let store = JsonUserStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "{}");
        assert!(store.get_all().unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_register_persists_across_instances() {
        let path = temp_db("persist");
        let mut store = JsonUserStore::open(&path).unwrap();
        store
            .register("alice", Signature::new(vec![0.25, -1.5, 3.0]))
            .unwrap();

        let reopened = JsonUserStore::open(&path).unwrap();
        let record = reopened.find("alice").unwrap().unwrap();
        assert_eq!(record.signature.values(), &[0.25, -1.5, 3.0]);
        assert!(!path.with_extension("json.tmp").exists());
        cleanup(&path);
    }

    #[test]
    fn test_on_disk_schema() {
        let path = temp_db("schema");
        let mut store = JsonUserStore::open(&path).unwrap();
        store.register("bob", Signature::new(vec![1.0, 2.0])).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["bob"]["signature"], serde_json::json!([1.0, 2.0]));
        let created = value["bob"]["created_at"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(created).is_ok());
        cleanup(&path);
    }

    #[test]
    fn test_reads_hand_written_file() {
        let path = temp_db("handwritten");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"carol": {"signature": [0.5], "created_at": "2024-03-01T12:00:00Z"}}"#,
        )
        .unwrap();

        let store = JsonUserStore::open(&path).unwrap();
        let users = store.get_all().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users["carol"].created_at.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        cleanup(&path);
    }

    #[test]
    fn test_corrupt_file_rejected_at_open() {
        let path = temp_db("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonUserStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
        cleanup(&path);
    }

    #[test]
    fn test_remove_and_external_edits() {
        let path = temp_db("remove");
        let mut first = JsonUserStore::open(&path).unwrap();
        let mut second = JsonUserStore::open(&path).unwrap();
        first.register("alice", Signature::new(vec![0.0])).unwrap();

        // A second handle sees the first handle's write.
        assert!(second.remove("alice").unwrap());
        assert!(first.find("alice").unwrap().is_none());
        assert!(!first.remove("alice").unwrap());
        cleanup(&path);
    }

    #[test]
    fn test_invalid_name_not_written() {
        let path = temp_db("invalid");
        let mut store = JsonUserStore::open(&path).unwrap();
        assert!(matches!(
            store.register(" ", Signature::new(vec![0.0])),
            Err(StoreError::InvalidName(_))
        ));
        assert!(store.get_all().unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_remove_matches_trimmed_registration() {
        let path = temp_db("trim");
        let mut store = JsonUserStore::open(&path).unwrap();
        store.register(" alice ", Signature::new(vec![0.5])).unwrap();

        assert!(store.find(" alice ").unwrap().is_some());
        assert!(store.remove(" alice ").unwrap());
        assert!(store.get_all().unwrap().is_empty());
        cleanup(&path);
    }

    #[test]
    fn test_opens_database_with_naive_timestamps() {
        let path = temp_db("naive");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"dave": {"signature": [0.5], "created_at": "2024-03-01T12:00:00.123456"}}"#,
        )
        .unwrap();

        let store = JsonUserStore::open(&path).unwrap();
        let record = store.find("dave").unwrap().unwrap();
        assert_eq!(record.created_at.to_rfc3339(), "2024-03-01T12:00:00.123456+00:00");
        cleanup(&path);
    }
}
