//! The schedule bank: looks up cheques by graph fingerprint and records new
//! ones.
//!
//! None of the public operations on [RlBank] fail. Every error is logged and
//! degrades to a miss, so callers can always fall back to searching for a
//! schedule from scratch.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::admission::{admit_for_entry, admit_for_retention};
use crate::cheque::{BankEntry, Cheque, Tick};
use crate::config::BankConfig;
use crate::fingerprint::{self, BankKey, EncodeError};
use crate::graph::{Graph, NodeId};
use crate::platform::{BankId, Platform};
use crate::store::paths::{builtin_file, resolve_builtin_root, resolve_custom_root};
use crate::store::{self, BankCache, Namespace, Namespaces, StoreError};

/// Key of the override blob under which forced cheques are listed.
pub const OVERRIDE_CHEQUE_KEY: &str = "rl_cheque";

/// Turns a cheque back into an executable schedule.
pub trait ScheduleGenerator {
    type Schedule;
    type Error: std::error::Error;

    fn withdraw(
        &self,
        graph: &Graph,
        outputs: &[NodeId],
        cheque: &Cheque,
    ) -> Result<(bool, Option<Self::Schedule>), Self::Error>;
}

/// Caller-supplied context for a lookup.
#[derive(Clone, Debug, Default)]
pub struct OpInfo {
    pub op_type: String,
    /// A node list the caller has already walked, in dependency order.
    pub node_list: Option<Vec<NodeId>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BankState {
    Enabled,
    /// Entered when a bank fails its first load. Lasts for the lifetime of
    /// the [RlBank].
    Disabled,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PromoteSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub kept: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BankError {
    #[error("Failed to resolve device identity: {0}")]
    Platform(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub struct RlBank<P: Platform> {
    config: BankConfig,
    platform: P,
    state: Mutex<BankState>,
    cache: Mutex<BankCache>,
}

impl<P: Platform> RlBank<P> {
    pub fn new(config: BankConfig, platform: P) -> Self {
        let state = if config.enabled {
            BankState::Enabled
        } else {
            BankState::Disabled
        };
        RlBank {
            config,
            platform,
            state: Mutex::new(state),
            cache: Mutex::new(BankCache::default()),
        }
    }

    pub fn from_env(platform: P) -> Self {
        Self::new(BankConfig::from_env(), platform)
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    pub fn state(&self) -> BankState {
        *self.state.lock()
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == BankState::Enabled
    }

    /// Returns the cached cheque for the graph rooted at `outputs`, or an
    /// empty cheque on a miss or any failure.
    pub fn query(&self, graph: &Graph, outputs: &[NodeId], op_info: Option<&OpInfo>) -> Cheque {
        self.try_query(graph, outputs, op_info)
            .unwrap_or_else(|e| {
                log::warn!("Bank query for {} failed: {}", op_name(op_info), e);
                Cheque::empty()
            })
    }

    /// Like [RlBank::query], but surfaces the failures that are not plain
    /// misses: device identity errors and unknown dtypes.
    pub fn try_query(
        &self,
        graph: &Graph,
        outputs: &[NodeId],
        op_info: Option<&OpInfo>,
    ) -> Result<Cheque, BankError> {
        if !self.is_enabled() {
            return Ok(Cheque::empty());
        }

        let id = self.bank_id()?;
        let namespaces = match self.ensure_loaded(&id) {
            Ok(ns) => ns,
            Err(e) => {
                self.disable(&id, &e);
                return Ok(Cheque::empty());
            }
        };

        let node_list = op_info.and_then(|info| info.node_list.as_deref());
        let key = fingerprint::bank_key(graph, outputs, node_list)?;
        if key.is_empty() {
            return Ok(Cheque::empty());
        }

        if let Some(cheque) = self.override_cheque(&key) {
            log::debug!("Bank override hit for {}", op_name(op_info));
            return Ok(cheque);
        }

        let hit = [("custom", &namespaces.custom), ("built-in", &namespaces.builtin)]
            .into_iter()
            .find_map(|(label, ns)| {
                ns.get(&key)
                    .filter(|entry| !entry.cheque().is_empty())
                    .map(|entry| (label, entry.cheque().clone()))
            });
        match hit {
            Some((label, cheque)) => {
                log::debug!(
                    "Bank hit for {} in {} namespace of {}",
                    op_name(op_info),
                    label,
                    id.name
                );
                Ok(cheque)
            }
            None => Ok(Cheque::empty()),
        }
    }

    /// Queries the bank and hands any hit to `generator`.
    ///
    /// Returns `(false, None)` on a miss, when the generator declines, or on
    /// any error.
    pub fn apply<G: ScheduleGenerator>(
        &self,
        generator: &G,
        graph: &Graph,
        outputs: &[NodeId],
        op_info: Option<&OpInfo>,
    ) -> (bool, Option<G::Schedule>) {
        let cheque = match self.try_query(graph, outputs, op_info) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Bank lookup for {} failed: {}", op_name(op_info), e);
                return (false, None);
            }
        };
        if cheque.is_empty() {
            return (false, None);
        }
        match generator.withdraw(graph, outputs, &cheque) {
            Ok((true, schedule)) => (true, schedule),
            Ok((false, _)) => {
                log::debug!("Cheque for {} was declined: {}", op_name(op_info), cheque);
                (false, None)
            }
            Err(e) => {
                log::warn!(
                    "Failed to build schedule for {} from cheque {}: {}",
                    op_name(op_info),
                    cheque,
                    e
                );
                (false, None)
            }
        }
    }

    /// Records `cheque` for the graph in the bank file at `path`.
    ///
    /// An existing entry is only replaced if `tick` is clearly better than
    /// the stored one. Returns whether the file was written.
    pub fn write(
        &self,
        graph: &Graph,
        outputs: &[NodeId],
        cheque: Cheque,
        tick: Tick,
        path: &Path,
    ) -> bool {
        match self.try_write(graph, outputs, cheque, tick, path) {
            Ok(written) => written,
            Err(e) => {
                log::warn!("Failed to add bank entry to {}: {}", path.display(), e);
                false
            }
        }
    }

    fn try_write(
        &self,
        graph: &Graph,
        outputs: &[NodeId],
        cheque: Cheque,
        tick: Tick,
        path: &Path,
    ) -> Result<bool, BankError> {
        let key = fingerprint::bank_key(graph, outputs, None)?;
        if key.is_empty() {
            log::debug!("Not adding entry to {}: graph has no bank key", path.display());
            return Ok(false);
        }

        let mut namespace = store::read_bank_file(path)?.unwrap_or_default();
        if let Some(existing) = namespace.get(&key) {
            if !admit_for_retention(existing.tick(), &tick) {
                log::info!(
                    "Keeping entry in {} with tick {} over new tick {} for {}",
                    path.display(),
                    existing.tick(),
                    tick,
                    key
                );
                return Ok(false);
            }
        }
        namespace.insert(key, BankEntry::new(cheque, tick));
        store::write_bank_file(path, &namespace)?;
        Ok(true)
    }

    /// Reloads the current device's bank from disk, replacing anything cached.
    /// Returns whether the reloaded bank has any entries.
    pub fn force_refresh(&self) -> bool {
        // The cached snapshot is only replaced once the reload has succeeded.
        let refreshed = self.bank_id().and_then(|id| {
            let namespaces = self.load_namespaces(&id)?;
            Ok(self.cache.lock().insert(&id.name, namespaces))
        });
        match refreshed {
            Ok(namespaces) => !namespaces.is_empty(),
            Err(e) => {
                log::warn!("Failed to refresh bank, keeping previous snapshot: {}", e);
                false
            }
        }
    }

    /// Drops any cached namespaces for `bank_name`. Returns whether there were
    /// any.
    pub fn invalidate(&self, bank_name: &str) -> bool {
        self.cache.lock().invalidate(bank_name)
    }

    /// Returns the namespaces of the current device's bank, loading them if
    /// needed.
    pub fn namespaces(&self) -> Result<Arc<Namespaces>, BankError> {
        let id = self.bank_id()?;
        Ok(self.ensure_loaded(&id)?)
    }

    fn bank_id(&self) -> Result<BankId, BankError> {
        BankId::resolve(&self.platform).map_err(|e| BankError::Platform(Box::new(e)))
    }

    fn ensure_loaded(&self, id: &BankId) -> Result<Arc<Namespaces>, StoreError> {
        if let Some(ns) = self.cache.lock().get(&id.name) {
            return Ok(ns);
        }
        let namespaces = self.load_namespaces(id)?;
        Ok(self.cache.lock().insert(&id.name, namespaces))
    }

    fn load_namespaces(&self, id: &BankId) -> Result<Namespaces, StoreError> {
        let custom_root = resolve_custom_root(&self.config);
        let custom = store::load_custom(&custom_root.namespace_dir(&id.soc_version), &id.name)?;
        let builtin = match resolve_builtin_root(&self.config) {
            Some(root) => store::load_builtin(&builtin_file(&root, &id.soc_version, &id.name))?,
            None => Namespace::new(),
        };
        log::info!(
            "Loaded bank {}: {} custom and {} built-in entries",
            id.name,
            custom.len(),
            builtin.len()
        );
        Ok(Namespaces { custom, builtin })
    }

    fn disable(&self, id: &BankId, error: &StoreError) {
        log::warn!(
            "Disabling schedule bank for this process; loading {} failed: {}",
            id.name,
            error
        );
        *self.state.lock() = BankState::Disabled;
    }

    fn override_cheque(&self, key: &BankKey) -> Option<Cheque> {
        let blob = self.config.bank_cache.as_deref()?;
        let parsed: serde_json::Value = match serde_json::from_str(blob) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Ignoring malformed BANK_CACHE override: {}", e);
                return None;
            }
        };
        parsed
            .get(OVERRIDE_CHEQUE_KEY)?
            .get(key.as_str())
            .map(|v| Cheque(v.clone()))
    }
}

/// Merges `candidates` into the bank file at `target`.
///
/// New keys are inserted. An existing entry is replaced only if the candidate
/// passes [admit_for_entry] against it. Candidates with empty cheques are
/// skipped.
pub fn promote(candidates: &Namespace, target: &Path) -> Result<PromoteSummary, BankError> {
    let mut bank = store::read_bank_file(target)?.unwrap_or_default();
    let mut summary = PromoteSummary::default();
    for (key, candidate) in candidates.iter() {
        if candidate.cheque().is_empty() {
            continue;
        }
        let key = BankKey::from(key.to_owned());
        match bank.get(&key) {
            None => summary.inserted += 1,
            Some(incumbent) if admit_for_entry(incumbent.tick(), candidate.tick()) => {
                summary.replaced += 1
            }
            Some(_) => {
                summary.kept += 1;
                continue;
            }
        }
        bank.insert(key, candidate.clone());
    }
    if summary.inserted + summary.replaced > 0 {
        store::write_bank_file(target, &bank)?;
    }
    log::info!(
        "Promoted into {}: {} inserted, {} replaced, {} kept",
        target.display(),
        summary.inserted,
        summary.replaced,
        summary.kept
    );
    Ok(summary)
}

fn op_name(op_info: Option<&OpInfo>) -> &str {
    op_info
        .map(|info| info.op_type.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("<unnamed op>")
}
