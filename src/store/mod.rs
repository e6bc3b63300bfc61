//! On-disk banks.
//!
//! A bank file is a JSON object from bank key to a JSON *string* holding the
//! `[cheque, tick]` pair. Custom banks may be split over several shard files
//! named `<bank_name>*.json`; built-in banks are a single read-only file.

pub mod paths;

use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cheque::BankEntry;
use crate::fingerprint::BankKey;

#[cfg(unix)]
const FILE_MODE: u32 = 0o660;
#[cfg(unix)]
const DIR_MODE: u32 = 0o770;

/// The decoded contents of one or more bank files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Namespace {
    entries: BTreeMap<String, BankEntry>,
}

/// The custom and built-in namespaces of one bank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Namespaces {
    pub custom: Namespace,
    pub builtin: Namespace,
}

/// Loaded namespaces, keyed by bank name.
#[derive(Debug, Default)]
pub struct BankCache {
    banks: HashMap<String, Arc<Namespaces>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed bank file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Malformed entry {key} in {}: {source}", path.display())]
    Entry {
        path: PathBuf,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_owned(),
            source,
        }
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &BankKey) -> Option<&BankEntry> {
        self.entries.get(key.as_str())
    }

    pub fn insert(&mut self, key: BankKey, entry: BankEntry) -> Option<BankEntry> {
        self.entries.insert(key.to_string(), entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BankEntry)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges `other` into `self`, keeping the entry with the higher tick for
    /// each key. On equal ticks the entry already in `self` is kept.
    pub fn merge_max_tick(&mut self, other: Namespace) {
        for (key, entry) in other.entries {
            match self.entries.get(&key) {
                Some(existing) if entry.tick().rank() <= existing.tick().rank() => {}
                _ => {
                    self.entries.insert(key, entry);
                }
            }
        }
    }

    /// Decodes the on-disk representation, where each value is itself JSON.
    pub fn decode(raw: BTreeMap<String, String>, path: &Path) -> Result<Self, StoreError> {
        let entries = raw
            .into_iter()
            .map(|(key, value)| match serde_json::from_str::<BankEntry>(&value) {
                Ok(entry) => Ok((key, entry)),
                Err(source) => Err(StoreError::Entry {
                    path: path.to_owned(),
                    key,
                    source,
                }),
            })
            .collect::<Result<_, _>>()?;
        Ok(Namespace { entries })
    }

    pub fn encode_for_storage(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
        self.entries
            .iter()
            .map(|(k, v)| Ok((k.clone(), serde_json::to_string(v)?)))
            .collect()
    }
}

impl FromIterator<(BankKey, BankEntry)> for Namespace {
    fn from_iter<T: IntoIterator<Item = (BankKey, BankEntry)>>(iter: T) -> Self {
        Namespace {
            entries: iter.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }
}

impl Namespaces {
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && self.builtin.is_empty()
    }
}

impl BankCache {
    pub fn get(&self, bank_name: &str) -> Option<Arc<Namespaces>> {
        self.banks.get(bank_name).cloned()
    }

    pub fn insert(&mut self, bank_name: &str, namespaces: Namespaces) -> Arc<Namespaces> {
        let namespaces = Arc::new(namespaces);
        self.banks
            .insert(bank_name.to_owned(), Arc::clone(&namespaces));
        namespaces
    }

    pub fn invalidate(&mut self, bank_name: &str) -> bool {
        self.banks.remove(bank_name).is_some()
    }
}

/// Reads a bank file. Returns `Ok(None)` if it does not exist.
pub fn read_bank_file(path: &Path) -> Result<Option<Namespace>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let raw = serde_json::from_str(&contents).map_err(|source| StoreError::Json {
        path: path.to_owned(),
        source,
    })?;
    Namespace::decode(raw, path).map(Some)
}

/// Replaces the bank file at `path` with `namespace`.
///
/// The file is written beside its destination and renamed into place, so
/// concurrent readers see either the old or the new contents. Concurrent
/// writers are not coordinated: the last rename wins.
pub fn write_bank_file(path: &Path, namespace: &Namespace) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    create_bank_dirs(dir)?;

    let raw = namespace
        .encode_for_storage()
        .map_err(|source| StoreError::Json {
            path: path.to_owned(),
            source,
        })?;
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
        raw.serialize(&mut ser).map_err(|source| StoreError::Json {
            path: path.to_owned(),
            source,
        })?;
        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }
    narrow_permissions(tmp.path(), FileKind::File)?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Loads every `<bank_name>*.json` shard in `dir` and merges them by tick.
///
/// When more than one shard is found, they are replaced by a single freshly
/// named shard holding the merged contents.
pub fn load_custom(dir: &Path, bank_name: &str) -> Result<Namespace, StoreError> {
    let shards = shard_files(dir, bank_name)?;
    let mut merged = Namespace::new();
    for shard in &shards {
        if let Some(ns) = read_bank_file(shard)? {
            merged.merge_max_tick(ns);
        }
    }
    if shards.len() > 1 {
        compact(dir, bank_name, &shards, &merged)?;
    }
    log::debug!(
        "Loaded {} custom entries for {} from {} shard(s)",
        merged.len(),
        bank_name,
        shards.len()
    );
    Ok(merged)
}

pub fn load_builtin(path: &Path) -> Result<Namespace, StoreError> {
    Ok(read_bank_file(path)?.unwrap_or_default())
}

/// Lists the custom shard files of a bank, sorted by file name.
pub fn shard_files(dir: &Path, bank_name: &str) -> Result<Vec<PathBuf>, StoreError> {
    let read_dir = match fs::read_dir(dir) {
        Ok(r) => r,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut shards = Vec::new();
    for dirent in read_dir {
        let dirent = dirent.map_err(|e| StoreError::io(dir, e))?;
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with(bank_name) && name.ends_with(".json") && dirent.path().is_file() {
            shards.push(dirent.path());
        }
    }
    Ok(shards.into_iter().sorted().collect())
}

fn compact(
    dir: &Path,
    bank_name: &str,
    shards: &[PathBuf],
    merged: &Namespace,
) -> Result<PathBuf, StoreError> {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    let target = dir.join(format!("{bank_name}_{micros}.json"));
    write_bank_file(&target, merged)?;
    for shard in shards.iter().filter(|s| **s != target) {
        match fs::remove_file(shard) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(shard, e)),
        }
    }
    log::info!(
        "Compacted {} shards of {} into {}",
        shards.len(),
        bank_name,
        target.display()
    );
    Ok(target)
}

enum FileKind {
    File,
    Dir,
}

/// Creates `dir` and any missing ancestors, narrowing each newly created
/// directory to owner and group.
fn create_bank_dirs(dir: &Path) -> Result<(), StoreError> {
    let missing = dir
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect::<Vec<_>>();
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    for created in missing.iter().rev() {
        narrow_permissions(created, FileKind::Dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn narrow_permissions(path: &Path, kind: FileKind) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = match kind {
        FileKind::File => FILE_MODE,
        FileKind::Dir => DIR_MODE,
    };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(not(unix))]
fn narrow_permissions(_path: &Path, _kind: FileKind) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cheque::{Cheque, Tick};
    use proptest::prelude::*;
    use serde_json::json;

    fn entry(cheque: serde_json::Value, tick: i64) -> BankEntry {
        BankEntry::new(Cheque(cheque), Tick::Int(tick))
    }

    fn key(s: &str) -> BankKey {
        BankKey::from(s.to_owned())
    }

    fn write_raw(path: &Path, raw: &[(&str, &str)]) {
        let map = raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        fs::write(path, serde_json::to_string(&map).unwrap()).unwrap();
    }

    #[test]
    fn test_file_values_are_double_encoded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bank.json");
        let ns: Namespace = [(key("[[0,[4],[],0,[]]]"), entry(json!([1, 2]), 30))]
            .into_iter()
            .collect();
        write_bank_file(&path, &ns).unwrap();

        let raw: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["[[0,[4],[],0,[]]]"], "[[1,2],30]");
        assert_eq!(read_bank_file(&path).unwrap(), Some(ns));
    }

    #[test]
    fn test_float_ticks_survive_rewrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bank.json");
        let tick = Tick::Float(251396209.48302066);
        let ns: Namespace = [(key("k"), BankEntry::new(Cheque(json!([3])), tick.clone()))]
            .into_iter()
            .collect();
        write_bank_file(&path, &ns).unwrap();
        for _ in 0..3 {
            let reread = read_bank_file(&path).unwrap().unwrap();
            assert_eq!(reread.get(&key("k")).unwrap().tick(), &tick);
            write_bank_file(&path, &reread).unwrap();
        }
        assert_eq!(read_bank_file(&path).unwrap(), Some(ns));
    }

    #[test]
    fn test_written_files_are_pretty_and_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bank.json");
        let ns: Namespace = [
            (key("b"), entry(json!([2]), 2)),
            (key("a"), entry(json!([1]), 1)),
        ]
        .into_iter()
        .collect();
        write_bank_file(&path, &ns).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\n    \"a\": \"[[1],1]\",\n    \"b\": \"[[2],2]\"\n}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_written_files_and_new_dirs_are_narrowed() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("soc/rl/bank.json");
        write_bank_file(&path, &Namespace::new()).unwrap();
        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), 0o660);
        assert_eq!(mode(&dir.path().join("soc")), 0o770);
        assert_eq!(mode(&dir.path().join("soc/rl")), 0o770);
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(read_bank_file(&dir.path().join("nope.json")).unwrap(), None);
        assert!(load_builtin(&dir.path().join("nope.json"))
            .unwrap()
            .is_empty());
        assert!(load_custom(&dir.path().join("nope"), "bank").unwrap().is_empty());
    }

    #[test]
    fn test_truncated_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bank.json");
        fs::write(&path, "{\"k\": \"[[1],").unwrap();
        assert!(matches!(
            read_bank_file(&path),
            Err(StoreError::Json { .. })
        ));
        write_raw(&path, &[("k", "not json")]);
        assert!(matches!(
            read_bank_file(&path),
            Err(StoreError::Entry { .. })
        ));
    }

    #[test]
    fn test_shards_merge_by_max_tick_and_compact() {
        let dir = tempfile::TempDir::new().unwrap();
        write_raw(
            &dir.path().join("soc_AiCore_2_v2_a.json"),
            &[("k", "[[\"a\"],10]"), ("only_a", "[[\"a\"],1]")],
        );
        write_raw(
            &dir.path().join("soc_AiCore_2_v2_b.json"),
            &[("k", "[[\"b\"],20]"), ("only_b", "[[\"b\"],1]")],
        );
        write_raw(&dir.path().join("other_bank.json"), &[("k", "[[\"c\"],99]")]);

        let ns = load_custom(dir.path(), "soc_AiCore_2_v2").unwrap();
        assert_eq!(ns.len(), 3);
        assert_eq!(ns.get(&key("k")), Some(&entry(json!(["b"]), 20)));

        let shards = shard_files(dir.path(), "soc_AiCore_2_v2").unwrap();
        assert_eq!(shards.len(), 1);
        assert!(!dir.path().join("soc_AiCore_2_v2_a.json").exists());
        assert!(!dir.path().join("soc_AiCore_2_v2_b.json").exists());
        assert!(dir.path().join("other_bank.json").exists());
        assert_eq!(read_bank_file(&shards[0]).unwrap(), Some(ns));
    }

    #[test]
    fn test_single_shard_is_not_rewritten() {
        let dir = tempfile::TempDir::new().unwrap();
        let shard = dir.path().join("bank_x.json");
        write_raw(&shard, &[("k", "[[1],5]")]);
        load_custom(dir.path(), "bank").unwrap();
        assert_eq!(shard_files(dir.path(), "bank").unwrap(), vec![shard]);
    }

    #[test]
    fn test_equal_ticks_keep_first_seen() {
        let mut first: Namespace = [(key("k"), entry(json!(["first"]), 7))]
            .into_iter()
            .collect();
        let second: Namespace = [(key("k"), entry(json!(["second"]), 7))]
            .into_iter()
            .collect();
        first.merge_max_tick(second);
        assert_eq!(first.get(&key("k")), Some(&entry(json!(["first"]), 7)));
    }

    #[test]
    fn test_cache_invalidation() {
        let mut cache = BankCache::default();
        cache.insert("bank", Namespaces::default());
        assert!(cache.get("bank").is_some());
        assert!(cache.invalidate("bank"));
        assert!(!cache.invalidate("bank"));
        assert!(cache.get("bank").is_none());
    }

    prop_compose! {
        fn arb_namespace()(
            entries in prop::collection::btree_map(
                "[a-z0-9\\[\\],]{1,12}",
                (prop::collection::vec(any::<i32>(), 0..4), prop_oneof![
                    any::<i64>().prop_map(Tick::Int),
                    (1.0f64..1e9).prop_map(Tick::Float),
                    Just(Tick::unknown()),
                ]),
                0..8,
            )
        ) -> Namespace {
            entries
                .into_iter()
                .map(|(k, (cheque, tick))| (key(&k), BankEntry::new(Cheque(json!(cheque)), tick)))
                .collect()
        }
    }

    proptest! {
        #[test]
        fn test_storage_round_trip(ns in arb_namespace()) {
            let raw = ns.encode_for_storage().unwrap();
            let decoded = Namespace::decode(raw, Path::new("mem")).unwrap();
            prop_assert_eq!(decoded, ns);
        }

        #[test]
        fn test_merge_keeps_larger_tick(a in 1i64..10_000, b in 1i64..10_000) {
            prop_assume!(a != b);
            let mut left: Namespace = [(key("k"), entry(json!(["a"]), a))].into_iter().collect();
            let right: Namespace = [(key("k"), entry(json!(["b"]), b))].into_iter().collect();
            left.merge_max_tick(right);
            let expected = if a > b { entry(json!(["a"]), a) } else { entry(json!(["b"]), b) };
            prop_assert_eq!(left.get(&key("k")), Some(&expected));
        }
    }
}
