//! Named resource registries with a single default entry.
//!
//! One [`NamedResourceRegistry`] exists per resource family (datasources,
//! cache clients, engine metadata). Each is filled once at startup by
//! [`NamedResourceRegistry::populate`]: resources discovered elsewhere are
//! adopted first, then every configured entry is merged against the family's
//! global template and built. After population the registry is read-only
//! until [`NamedResourceRegistry::release_all`] tears it down.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hinny_config::merge::{NamedConfig, effective};
use parking_lot::RwLock;

use crate::error::{BoxError, Error, Result};

/// Something a registry can shut down.
pub trait Release: Send + Sync + 'static {
    /// Free the underlying connections, threads or handles.
    fn release(&self) -> impl Future<Output = std::result::Result<(), BoxError>> + Send;
}

/// A resource that exists before population, optionally already named.
#[derive(Debug)]
pub struct Discovered<T> {
    /// Name it was published under, if any
    pub name: Option<String>,
    /// The resource
    pub resource: T,
}

impl<T> Discovered<T> {
    /// A discovered resource with a known name
    pub fn named(name: impl Into<String>, resource: T) -> Self {
        Self {
            name: Some(name.into()),
            resource,
        }
    }

    /// A discovered resource that needs a generated name
    pub fn unnamed(resource: T) -> Self {
        Self {
            name: None,
            resource,
        }
    }
}

/// Everything one population run consumes.
#[derive(Debug)]
pub struct Population<C, T> {
    /// Resources that already exist, in discovery order
    pub discovered: Vec<Discovered<T>>,
    /// Explicit default name; blank counts as unset
    pub default_name: Option<String>,
    /// Template every configured entry is merged onto
    pub global: C,
    /// Per-name overrides
    pub configured: BTreeMap<String, C>,
}

impl<C: Default, T> Default for Population<C, T> {
    fn default() -> Self {
        Self {
            discovered: Vec::new(),
            default_name: None,
            global: C::default(),
            configured: BTreeMap::new(),
        }
    }
}

/// Per-entry outcome of a teardown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    /// Entries released cleanly
    pub released: Vec<String>,
    /// Entries whose release failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl TeardownReport {
    /// Whether every entry released cleanly
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Name → resource map for one family, with one default entry.
pub struct NamedResourceRegistry<T: Release> {
    family: String,
    entries: DashMap<String, Arc<T>>,
    /// Insertion order, for listing and teardown.
    order: RwLock<Vec<String>>,
    default: RwLock<Option<String>>,
    populated: AtomicBool,
}

impl<T: Release> std::fmt::Debug for NamedResourceRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedResourceRegistry")
            .field("family", &self.family)
            .field("names", &*self.order.read())
            .field("default", &*self.default.read())
            .finish()
    }
}

impl<T: Release> NamedResourceRegistry<T> {
    /// Create an empty registry for a family (e.g. "datasource").
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            entries: DashMap::new(),
            order: RwLock::new(Vec::new()),
            default: RwLock::new(None),
            populated: AtomicBool::new(false),
        }
    }

    /// Family label used in names, logs and errors
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Register `resource` under `name`.
    pub fn add(&self, name: &str, resource: T) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::configuration(format!(
                "{} resource name must not be blank",
                self.family
            )));
        }
        match self.entries.entry(name.to_owned()) {
            Entry::Occupied(_) => {
                return Err(Error::DuplicateName {
                    family: self.family.clone(),
                    name: name.to_owned(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(resource));
            }
        }
        self.order.write().push(name.to_owned());
        tracing::debug!(family = %self.family, name, "registered resource");
        Ok(())
    }

    /// Make `name` the default, replacing any previous default.
    pub fn set_default(&self, name: &str) -> Result<()> {
        if !self.entries.contains_key(name) {
            return Err(self.unknown(name));
        }
        *self.default.write() = Some(name.to_owned());
        Ok(())
    }

    /// Look up a resource by name.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| self.unknown(name))
    }

    /// The default resource.
    pub fn get_default(&self) -> Result<Arc<T>> {
        let name = self.default.read().clone().ok_or_else(|| Error::NoDefault {
            family: self.family.clone(),
        })?;
        self.get(&name)
    }

    /// Name of the default resource, if one is set
    pub fn default_name(&self) -> Option<String> {
        self.default.read().clone()
    }

    /// Whether `name` is registered
    pub fn has_resource(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether population already ran
    pub fn is_populated(&self) -> bool {
        self.populated.load(Ordering::Acquire)
    }

    /// Release and unregister one resource.
    ///
    /// Returns `Ok(false)` when nothing was registered under `name`.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let Some(resource) = self.detach(name) else {
            return Ok(false);
        };
        resource
            .release()
            .await
            .map_err(|e| Error::release(&self.family, name, e.to_string()))?;
        tracing::info!(family = %self.family, name, "released resource");
        Ok(true)
    }

    /// Release every resource, continuing past individual failures.
    pub async fn release_all(&self) -> TeardownReport {
        let names = std::mem::take(&mut *self.order.write());
        *self.default.write() = None;

        let mut report = TeardownReport::default();
        for name in names {
            let Some((_, resource)) = self.entries.remove(&name) else {
                continue;
            };
            match resource.release().await {
                Ok(()) => {
                    tracing::info!(family = %self.family, name = %name, "released resource");
                    report.released.push(name);
                }
                Err(e) => {
                    tracing::warn!(
                        family = %self.family,
                        name = %name,
                        error = %e,
                        "failed to release resource"
                    );
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    /// Fill the registry once.
    ///
    /// 1. Discovered resources are added in order; unnamed ones become
    ///    `"{family}-{n}"` with `n` their 1-based position.
    /// 2. Without an explicit default, the first discovered name is adopted.
    /// 3. Configured entries are merged onto `global` (see
    ///    [`effective`]) and built in key order; a key colliding with a
    ///    discovered name is rejected before `build` runs.
    /// 4. The default must exist at the end.
    ///
    /// Returns `Ok(false)` without doing anything when population already
    /// ran, successfully or not.
    pub fn populate<C, B>(&self, population: Population<C, T>, mut build: B) -> Result<bool>
    where
        C: NamedConfig,
        B: FnMut(&str, C) -> Result<T>,
    {
        if self
            .populated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(family = %self.family, "registry already populated");
            return Ok(false);
        }

        let Population {
            discovered,
            default_name,
            global,
            configured,
        } = population;
        let mut default = default_name.filter(|name| !name.trim().is_empty());

        for (index, found) in discovered.into_iter().enumerate() {
            let name = found
                .name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| format!("{}-{}", self.family, index + 1));
            self.add(&name, found.resource)?;
            tracing::info!(family = %self.family, name = %name, "adopted discovered resource");
            if default.is_none() {
                default = Some(name);
            }
        }

        for (key, over) in &configured {
            if self.has_resource(key) {
                return Err(Error::DuplicateName {
                    family: self.family.clone(),
                    name: key.clone(),
                });
            }
            let config = effective(key, &global, over);
            let resource = build(key, config)?;
            self.add(key, resource)?;
            tracing::info!(family = %self.family, name = %key, "built configured resource");
        }

        let default = default.ok_or_else(|| {
            Error::configuration(format!(
                "no default {} resource: set default_name or configure at least one",
                self.family
            ))
        })?;
        if !self.has_resource(&default) {
            return Err(Error::configuration(format!(
                "default {} resource '{}' does not exist",
                self.family, default
            )));
        }
        self.set_default(&default)?;
        tracing::info!(
            family = %self.family,
            default = %default,
            count = self.len(),
            "registry populated"
        );
        Ok(true)
    }

    fn detach(&self, name: &str) -> Option<Arc<T>> {
        let (_, resource) = self.entries.remove(name)?;
        self.order.write().retain(|n| n != name);
        let mut default = self.default.write();
        if default.as_deref() == Some(name) {
            *default = None;
        }
        Some(resource)
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownName {
            family: self.family.clone(),
            name: name.to_owned(),
        }
    }
}
