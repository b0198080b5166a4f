//! Extensions advertised by the peer in INIT or VERSION.

#[allow(unused_imports)]
use log::{debug, error, info, log, trace, warn};

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::proto::VersionInfo;

/// Extension name to the advertised version strings.
///
/// A name may be advertised more than once, each advertisement is kept.
#[derive(Debug, Default, Clone)]
pub struct Extensions {
    map: BTreeMap<String, Vec<String>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, data: &str) {
        self.map.entry(name.into()).or_default().push(data.into());
    }

    /// Adds all extension pairs, replacing invalid UTF-8
    pub(crate) fn add_version_info(&mut self, info: &VersionInfo) {
        for e in info.extensions.iter() {
            let name = e.name.to_string_lossy();
            let data = e.data.to_string_lossy();
            trace!("extension {name} {data}");
            self.add(&name, &data);
        }
    }

    /// All versions advertised for `name`, empty if none
    pub fn get(&self, name: &str) -> &[String] {
        self.map.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether `name` was advertised with exactly `version`
    pub fn supports(&self, name: &str, version: &str) -> bool {
        self.get(name).iter().any(|v| v == version)
    }

    /// Fails unless [`supports()`](Self::supports)
    pub fn check(&self, name: &'static str, version: &str) -> Result<()> {
        if self.supports(name, version) {
            Ok(())
        } else {
            debug!("{name} {version} not advertised");
            Err(Error::ExtensionUnsupported { name })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
