use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Vendor-reported attributes for one security (description, exchange, type,
/// pricescale, tick size, ...), keyed by the qualified symbol.
///
/// The field set varies by security type (futures carry point values, stocks
/// do not), so this stays a flat key/value map rather than a rigid struct.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityInfo {
    pub symbol: String,
    pub fields: BTreeMap<String, toml::Value>,
}

impl SecurityInfo {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(toml::Value::as_str)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.fields.get(key) {
            Some(toml::Value::Float(f)) => Some(*f),
            Some(toml::Value::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Read-through cache for [`SecurityInfo`].
///
/// `store` is first-write-wins: once a symbol has a section in the backing
/// store it is never overwritten, so repeated fetches cannot clobber the
/// originally recorded attributes.
pub trait SecurityInfoCache: Send + Sync {
    fn lookup(&self, symbol: &str) -> anyhow::Result<Option<SecurityInfo>>;
    fn store(&self, info: &SecurityInfo) -> anyhow::Result<()>;
}

/// TOML-file backed [`SecurityInfoCache`]: one `[section]` per symbol.
///
/// New sections are appended to the file; existing sections are left
/// untouched, which keeps the file free of duplicate section headers.
pub struct TomlSecurityCache {
    path: PathBuf,
}

impl TomlSecurityCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> anyhow::Result<toml::Table> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(toml::Table::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text.parse::<toml::Table>()?)
    }
}

impl SecurityInfoCache for TomlSecurityCache {
    fn lookup(&self, symbol: &str) -> anyhow::Result<Option<SecurityInfo>> {
        let table = self.read_all()?;
        let Some(toml::Value::Table(section)) = table.get(symbol) else {
            return Ok(None);
        };
        let mut info = SecurityInfo::new(symbol);
        for (k, v) in section {
            info.fields.insert(k.clone(), v.clone());
        }
        debug!("security info cache hit for {symbol}");
        Ok(Some(info))
    }

    fn store(&self, info: &SecurityInfo) -> anyhow::Result<()> {
        let existing = self.read_all()?;
        if existing.contains_key(&info.symbol) {
            // First write wins; later fetches must not rewrite the section.
            debug!("security info for {} already cached, keeping original", info.symbol);
            return Ok(());
        }

        let mut section = toml::Table::new();
        for (k, v) in &info.fields {
            section.insert(k.clone(), v.clone());
        }
        let mut doc = toml::Table::new();
        doc.insert(info.symbol.clone(), toml::Value::Table(section));
        let rendered = toml::to_string(&doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if !existing.is_empty() {
            writeln!(file)?;
        }
        file.write_all(rendered.as_bytes())?;
        Ok(())
    }
}

/// A cache that remembers nothing; useful when the caller opts out.
pub struct NullSecurityCache;

impl SecurityInfoCache for NullSecurityCache {
    fn lookup(&self, _symbol: &str) -> anyhow::Result<Option<SecurityInfo>> {
        Ok(None)
    }

    fn store(&self, info: &SecurityInfo) -> anyhow::Result<()> {
        warn!("security info for {} discarded (no cache configured)", info.symbol);
        Ok(())
    }
}
