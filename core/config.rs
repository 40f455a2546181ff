// Flat key/value configuration with line-oriented file serialization
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Flat mapping from dotted string keys to string values.
///
/// Keys are free-form but conventionally dotted ("daemon.listen.tcp"), which
/// makes prefix-scoped iteration useful for handing a component only its own
/// slice of the configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    values: BTreeMap<String, String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        ConfigStore::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries whose key starts with `prefix`, in key order.
    pub fn iter_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.values
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse `key=value` lines. Blank lines and `#` comments are skipped;
    /// malformed lines (no `=`) are reported with their line number.
    pub fn parse(text: &str) -> io::Result<Self> {
        let mut store = ConfigStore::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => store.set(key.trim(), value.trim()),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line {}: expected key=value, got {:?}", idx + 1, line),
                    ));
                }
            }
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        ConfigStore::parse(&text)
    }

    /// Serialize as sorted `key=value` lines.
    pub fn store(&self, path: &Path) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        for (key, value) in &self.values {
            writeln!(file, "{}={}", key, value)?;
        }
        Ok(())
    }
}
