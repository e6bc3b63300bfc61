/// Version of the bank key and entry formats. Bump whenever either changes so
/// that banks written by older encoders are never consulted.
pub const BANK_SCHEMA_VERSION: &str = "v2";

/// Device identity used to scope banks.
pub trait Platform {
    type Error: std::error::Error + Send + Sync + 'static;

    fn soc_version(&self) -> Result<String, Self::Error>;
    fn aicore_type(&self) -> Result<String, Self::Error>;
    fn core_num(&self) -> Result<u32, Self::Error>;
}

/// A fixed device identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocInfo {
    pub soc_version: String,
    pub aicore_type: String,
    pub core_num: u32,
}

/// A resolved device identity together with its bank name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BankId {
    pub soc_version: String,
    pub name: String,
}

impl SocInfo {
    pub fn new(soc_version: &str, aicore_type: &str, core_num: u32) -> Self {
        SocInfo {
            soc_version: soc_version.to_owned(),
            aicore_type: aicore_type.to_owned(),
            core_num,
        }
    }
}

impl Platform for SocInfo {
    type Error = std::convert::Infallible;

    fn soc_version(&self) -> Result<String, Self::Error> {
        Ok(self.soc_version.clone())
    }

    fn aicore_type(&self) -> Result<String, Self::Error> {
        Ok(self.aicore_type.clone())
    }

    fn core_num(&self) -> Result<u32, Self::Error> {
        Ok(self.core_num)
    }
}

pub fn bank_name(soc_version: &str, aicore_type: &str, core_num: u32) -> String {
    format!("{soc_version}_{aicore_type}_{core_num}_{BANK_SCHEMA_VERSION}")
}

impl BankId {
    pub fn resolve<P: Platform>(platform: &P) -> Result<Self, P::Error> {
        let soc_version = platform.soc_version()?;
        let name = bank_name(&soc_version, &platform.aicore_type()?, platform.core_num()?);
        Ok(BankId { soc_version, name })
    }
}
