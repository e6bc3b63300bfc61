use std::path::PathBuf;

pub const TUNE_BANK_PATH: &str = "TUNE_BANK_PATH";
pub const ASCEND_OPP_PATH: &str = "ASCEND_OPP_PATH";
pub const LD_LIBRARY_PATH: &str = "LD_LIBRARY_PATH";
pub const ENABLE_TUNE_BANK: &str = "ENABLE_TUNE_BANK";
pub const BANK_CACHE: &str = "BANK_CACHE";

pub const DEFAULT_OPP_PATH: &str = "/usr/local/Ascend/opp";
/// Directory under `$HOME` holding the default custom banks.
pub const DEFAULT_CUSTOM_DIR: &str = "atc_data";

/// A snapshot of the environment the bank is configured from.
///
/// Empty path variables are treated as unset. An empty `ENABLE_TUNE_BANK` is
/// not `true` and disables the bank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BankConfig {
    pub tune_bank_path: Option<PathBuf>,
    pub opp_path: Option<PathBuf>,
    pub ld_library_path: Option<String>,
    pub enabled: bool,
    /// Raw JSON of a one-shot override mapping.
    pub bank_cache: Option<String>,
    pub home: Option<PathBuf>,
    /// Resolve built-in banks through `LD_LIBRARY_PATH` even if the install
    /// root exists.
    pub force_legacy_layout: bool,
}

impl Default for BankConfig {
    fn default() -> Self {
        BankConfig {
            tune_bank_path: None,
            opp_path: None,
            ld_library_path: None,
            enabled: true,
            bank_cache: None,
            home: None,
            force_legacy_layout: false,
        }
    }
}

impl BankConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        BankConfig {
            tune_bank_path: get(TUNE_BANK_PATH).map(PathBuf::from),
            opp_path: get(ASCEND_OPP_PATH).map(PathBuf::from),
            ld_library_path: get(LD_LIBRARY_PATH),
            enabled: parse_enabled(lookup(ENABLE_TUNE_BANK).as_deref()),
            bank_cache: get(BANK_CACHE),
            home: get("HOME").map(PathBuf::from),
            force_legacy_layout: false,
        }
    }

    pub fn install_root(&self) -> PathBuf {
        self.opp_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OPP_PATH))
    }

    pub fn default_custom_root(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CUSTOM_DIR)
    }
}

fn parse_enabled(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.eq_ignore_ascii_case("true"))
}
