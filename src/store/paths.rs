//! Locating custom and built-in bank directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::BankConfig;

/// Sub-directory of a SoC's custom root when the default root is used.
pub const DEFAULT_CUSTOM_SUBDIR: &str = "rl";
/// Sub-directory of a SoC's custom root when `TUNE_BANK_PATH` is used.
pub const EXPLICIT_CUSTOM_SUBDIR: &str = "custom";
pub const BUILTIN_SUBDIR: &str = "built-in";
pub const LEGACY_LIB_SUFFIXES: [&str; 2] = ["/fwkacllib/lib64", "/atc/lib64"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomRoot {
    /// Whether `path` came from a validated `TUNE_BANK_PATH`.
    pub explicit: bool,
    pub path: PathBuf,
}

impl CustomRoot {
    /// Directory holding the custom shards for a SoC.
    pub fn namespace_dir(&self, soc_version: &str) -> PathBuf {
        let subdir = if self.explicit {
            EXPLICIT_CUSTOM_SUBDIR
        } else {
            DEFAULT_CUSTOM_SUBDIR
        };
        self.path.join(soc_version).join(subdir)
    }
}

/// Resolves the custom bank root.
///
/// An explicit `TUNE_BANK_PATH` is canonicalized and used only if it is a
/// directory this process can list and write to. Otherwise the default root
/// under `$HOME` is used.
pub fn resolve_custom_root(config: &BankConfig) -> CustomRoot {
    if let Some(requested) = &config.tune_bank_path {
        match validate_explicit_root(requested) {
            Ok(path) => return CustomRoot { explicit: true, path },
            Err(e) => log::warn!(
                "Ignoring TUNE_BANK_PATH {}: {}; using {}",
                requested.display(),
                e,
                config.default_custom_root().display()
            ),
        }
    }
    CustomRoot {
        explicit: false,
        path: config.default_custom_root(),
    }
}

fn validate_explicit_root(requested: &Path) -> io::Result<PathBuf> {
    let path = fs::canonicalize(requested)?;
    if !fs::metadata(&path)?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
    }
    // Listing needs read and execute; creating a scratch file needs write.
    fs::read_dir(&path)?;
    tempfile::tempfile_in(&path)?;
    Ok(path)
}

/// Resolves the built-in bank root, or `None` if there is none for this
/// process.
///
/// The install root layout (`<opp>/data/rl`) is preferred. If the install root
/// is missing, or the legacy layout is forced, `LD_LIBRARY_PATH` is searched
/// for a toolkit library directory and `data/rl` is taken relative to it.
pub fn resolve_builtin_root(config: &BankConfig) -> Option<PathBuf> {
    let install_root = config.install_root();
    if !config.force_legacy_layout && install_root.exists() {
        return Some(install_root.join("data").join("rl"));
    }
    let legacy = config
        .ld_library_path
        .as_deref()
        .and_then(legacy_builtin_root);
    if legacy.is_none() {
        log::debug!(
            "No built-in bank root: {} unusable and no toolkit in LD_LIBRARY_PATH",
            install_root.display()
        );
    }
    legacy
}

fn legacy_builtin_root(search_path: &str) -> Option<PathBuf> {
    search_path.split(':').find_map(|segment| {
        let segment = segment.strip_suffix('/').unwrap_or(segment);
        LEGACY_LIB_SUFFIXES.iter().find_map(|suffix| {
            segment
                .strip_suffix(suffix)
                .map(|prefix| Path::new(prefix).join("data").join("rl"))
        })
    })
}

pub fn builtin_file(builtin_root: &Path, soc_version: &str, bank_name: &str) -> PathBuf {
    builtin_root
        .join(soc_version)
        .join(BUILTIN_SUBDIR)
        .join(format!("{bank_name}.json"))
}
