//! Mapping hits to analytics site ids.

use std::collections::HashMap;

use crate::config::SiteConfig;
use crate::error::ImportError;
use crate::hit::Hit;
use crate::stats::StatsRegistry;

/// Where hostnames are looked up and, when allowed, registered
pub trait SiteDirectory: Send {
    fn lookup(&self, hostname: &str) -> Option<u32>;
    fn create(&mut self, hostname: &str) -> Result<u32, ImportError>;
}

/// In-memory hostname table seeded from `--site HOST=ID`
#[derive(Debug, Default, Clone)]
pub struct StaticSiteDirectory {
    sites: HashMap<String, u32>,
}

impl StaticSiteDirectory {
    pub fn new(known_sites: &[(String, u32)]) -> Self {
        Self {
            sites: known_sites
                .iter()
                .map(|(host, id)| (host.to_lowercase(), *id))
                .collect(),
        }
    }
}

impl SiteDirectory for StaticSiteDirectory {
    fn lookup(&self, hostname: &str) -> Option<u32> {
        self.sites.get(hostname).copied()
    }

    fn create(&mut self, hostname: &str) -> Result<u32, ImportError> {
        let next = self
            .sites
            .values()
            .max()
            .map_or(Some(1), |max| max.checked_add(1))
            .ok_or_else(|| ImportError::Config(format!("no site id left for {}", hostname)))?;
        self.sites.insert(hostname.to_string(), next);
        Ok(next)
    }
}

/// Applies the site policy to accepted hits.
///
/// Order: replayed `idsite`, forced `--idsite`, the hostname table,
/// auto-creation, `--idsite-fallback`. Table lookups are cached per hostname.
pub struct SiteResolver {
    config: SiteConfig,
    replay_tracking: bool,
    directory: Box<dyn SiteDirectory>,
    cache: HashMap<String, Option<u32>>,
}

impl SiteResolver {
    pub fn new(config: &SiteConfig, replay_tracking: bool, directory: Box<dyn SiteDirectory>) -> Self {
        Self {
            config: config.clone(),
            replay_tracking,
            directory,
            cache: HashMap::new(),
        }
    }

    pub fn with_static_table(config: &SiteConfig, replay_tracking: bool) -> Self {
        let directory = StaticSiteDirectory::new(&config.known_sites);
        Self::new(config, replay_tracking, Box::new(directory))
    }

    /// Site id for `hit`, or `None` when it belongs to no site (counted as `no_site`)
    pub fn resolve(&mut self, hit: &Hit, stats: &StatsRegistry) -> Result<Option<u32>, ImportError> {
        let site_id = self.lookup(hit, stats)?;
        match site_id {
            Some(id) => stats.site_used(id),
            None => {
                stats.no_site.increment();
                if let Some(host) = &hit.host {
                    stats.site_ignored(host);
                }
            }
        }
        Ok(site_id)
    }

    fn lookup(&mut self, hit: &Hit, stats: &StatsRegistry) -> Result<Option<u32>, ImportError> {
        if self.replay_tracking {
            if let Some(id) = hit.site_id {
                return Ok(Some(id));
            }
        }
        if let Some(id) = self.config.site_id {
            return Ok(Some(id));
        }
        let Some(host) = hit.host.as_deref() else {
            return Ok(self.config.site_id_fallback);
        };

        if let Some(cached) = self.cache.get(host) {
            return Ok(cached.or(self.config.site_id_fallback));
        }

        let mut found = self.directory.lookup(host);
        if found.is_none() && self.config.add_sites_new_hosts {
            let id = self.directory.create(host)?;
            tracing::info!(hostname = host, site_id = id, "created site");
            stats.site_created(host, id);
            found = Some(id);
        }
        if found.is_none() {
            tracing::debug!(hostname = host, "no site for hostname");
        }
        self.cache.insert(host.to_string(), found);
        Ok(found.or(self.config.site_id_fallback))
    }
}
