use std::fs;
use std::path::{Path, PathBuf};

use common::{stable_id, ProviderTag};
use library::ScanOptions;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RegistryError;

pub const REGISTRY_VERSION: u32 = 1;
const LOCAL_SCHEME: &str = "file://";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderEntry {
    pub fn is_local(&self) -> bool {
        self.url.to_ascii_lowercase().starts_with(LOCAL_SCHEME)
    }

    /// Directory behind a `file://` address.
    pub fn local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        Some(PathBuf::from(&self.url[LOCAL_SCHEME.len()..]))
    }

    pub fn tag(&self) -> ProviderTag {
        ProviderTag {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub poll_interval_secs: u64,
    pub test_connection_before_scan: bool,
    pub scan_options: ScanOptions,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            test_connection_before_scan: true,
            scan_options: ScanOptions::default(),
        }
    }
}

/// The client's list of configured providers, persisted as YAML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderRegistry {
    pub version: u32,
    pub active_id: Option<String>,
    pub providers: Vec<ProviderEntry>,
    pub settings: RegistrySettings,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            active_id: None,
            providers: Vec::new(),
            settings: RegistrySettings::default(),
        }
    }
}

/// Same address, same id: lowercased, without trailing slashes.
pub fn provider_id_for(url: &str) -> String {
    stable_id(&normalize_url(url))
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

impl ProviderRegistry {
    /// A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            info!("No provider registry at {:?}; starting empty", path);
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let mut registry: ProviderRegistry = serde_yaml::from_str(&contents)?;
        registry.version = REGISTRY_VERSION;
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_yaml::to_string(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Adds a provider, or updates the one already registered at `url`.
    pub fn add_provider(
        &mut self,
        name: &str,
        url: &str,
        token: Option<String>,
        color: Option<String>,
    ) -> String {
        let id = provider_id_for(url);
        let url = url.trim().trim_end_matches('/').to_string();
        match self.providers.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.name = name.to_string();
                entry.url = url;
                entry.token = token;
                entry.color = color;
            }
            None => self.providers.push(ProviderEntry {
                id: id.clone(),
                name: name.to_string(),
                url,
                token,
                color,
                enabled: true,
            }),
        }
        if self.active_id.is_none() {
            self.active_id = Some(id.clone());
        }
        id
    }

    pub fn remove_provider(&mut self, id: &str) -> Option<ProviderEntry> {
        let index = self.providers.iter().position(|entry| entry.id == id)?;
        let removed = self.providers.remove(index);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.providers.first().map(|entry| entry.id.clone());
        }
        Some(removed)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        let entry = self
            .providers
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| RegistryError::UnknownProvider(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), RegistryError> {
        if self.get(id).is_none() {
            return Err(RegistryError::UnknownProvider(id.to_string()));
        }
        self.active_id = Some(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|entry| entry.id == id)
    }

    pub fn active(&self) -> Option<&ProviderEntry> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ProviderEntry> {
        self.providers.iter().filter(|entry| entry.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readding_an_address_reuses_its_id() {
        let mut registry = ProviderRegistry::default();
        let first = registry.add_provider("NAS", "http://nas.local:3000/", None, None);
        let second = registry.add_provider(
            "Living room",
            "HTTP://NAS.local:3000",
            Some("token".into()),
            Some("#ff0000".into()),
        );
        assert_eq!(first, second);
        assert_eq!(registry.providers.len(), 1);
        let entry = registry.get(&first).unwrap();
        assert_eq!(entry.name, "Living room");
        assert_eq!(entry.token.as_deref(), Some("token"));
        assert_eq!(registry.active().map(|e| e.id.as_str()), Some(first.as_str()));
    }

    #[test]
    fn file_urls_are_local() {
        let mut registry = ProviderRegistry::default();
        let id = registry.add_provider("Disk", "file:///srv/music", None, None);
        let entry = registry.get(&id).unwrap();
        assert!(entry.is_local());
        assert_eq!(entry.local_path(), Some(PathBuf::from("/srv/music")));
    }

    #[test]
    fn removing_the_active_provider_moves_active() {
        let mut registry = ProviderRegistry::default();
        let a = registry.add_provider("A", "http://a", None, None);
        let b = registry.add_provider("B", "http://b", None, None);
        registry.remove_provider(&a).unwrap();
        assert_eq!(registry.active_id.as_deref(), Some(b.as_str()));
        assert!(registry.set_active("missing").is_err());
        assert!(registry.set_enabled("missing", false).is_err());
    }

    #[test]
    fn yaml_round_trip_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.yaml");
        assert_eq!(ProviderRegistry::load(&path).unwrap(), ProviderRegistry::default());

        let mut registry = ProviderRegistry::default();
        let id = registry.add_provider("A", "http://a", Some("t".into()), None);
        registry.set_enabled(&id, false).unwrap();
        registry.settings.poll_interval_secs = 5;
        registry.save(&path).unwrap();

        let loaded = ProviderRegistry::load(&path).unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(loaded.enabled().count(), 0);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let registry: ProviderRegistry = serde_yaml::from_str(
            "providers:\n  - id: x\n    name: X\n    url: http://x\n",
        )
        .unwrap();
        assert!(registry.providers[0].enabled);
        assert_eq!(registry.settings.poll_interval_secs, 15);
        assert!(registry.settings.scan_options.parallel_scanning);
    }
}
