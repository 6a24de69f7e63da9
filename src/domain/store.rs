//! Site & cluster store.
//!
//! Sites live in storage order. Named clusters are explicit, ordered and
//! non-overlapping; every site not in a named cluster belongs to the implicit
//! "free spins" cluster, whose members are optimised one at a time.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Site;
use crate::error::AppError;

/// Label of the implicit cluster holding every unassigned site.
pub const FREE_CLUSTER: &str = "free spins";

/// Identity of one optimisation unit.
///
/// Named clusters keep their name; free sites get `free:<site id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn free(site: &str) -> Self {
        Self(format!("free:{site}"))
    }

    pub fn named(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn is_free(&self) -> bool {
        self.0.starts_with("free:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NamedCluster {
    name: String,
    members: Vec<String>,
}

/// Filter for [`SiteStore::site_iter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    All,
    Selected,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StoreRepr")]
pub struct SiteStore {
    sites: Vec<Site>,
    clusters: Vec<NamedCluster>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct StoreRepr {
    sites: Vec<Site>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
}

impl From<StoreRepr> for SiteStore {
    fn from(repr: StoreRepr) -> Self {
        let mut store = Self {
            sites: repr.sites,
            clusters: repr.clusters,
            index: HashMap::new(),
        };
        store.reindex();
        store
    }
}

impl SiteStore {
    pub fn new(sites: Vec<Site>) -> Result<Self, AppError> {
        let mut store = Self::default();
        for site in sites {
            store.add_site(site)?;
        }
        Ok(store)
    }

    pub fn add_site(&mut self, site: Site) -> Result<(), AppError> {
        if self.index.contains_key(&site.id) {
            return Err(AppError::invalid(format!("Duplicate site id '{}'.", site.id)));
        }
        self.index.insert(site.id.clone(), self.sites.len());
        self.sites.push(site);
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .sites
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Site> {
        self.index.get(id).map(|&i| &self.sites[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Site> {
        self.index.get(id).map(|&i| &mut self.sites[i])
    }

    /// Assign `members` to the named cluster `name`.
    ///
    /// A site can only be in one cluster: it is removed from any previous named
    /// cluster, and clusters emptied that way are deleted. Assigning to
    /// [`FREE_CLUSTER`] releases the sites.
    pub fn cluster(&mut self, name: &str, members: &[String]) -> Result<(), AppError> {
        for m in members {
            if !self.index.contains_key(m) {
                return Err(AppError::invalid(format!(
                    "Cannot cluster unknown site '{m}'."
                )));
            }
        }

        for c in &mut self.clusters {
            c.members.retain(|s| !members.contains(s));
        }
        self.clusters.retain(|c| !c.members.is_empty());

        if name == FREE_CLUSTER {
            return Ok(());
        }

        match self.clusters.iter_mut().find(|c| c.name == name) {
            Some(c) => c.members.extend(members.iter().cloned()),
            None => self.clusters.push(NamedCluster {
                name: name.to_string(),
                members: members.to_vec(),
            }),
        }
        Ok(())
    }

    /// Name of the cluster holding `site`, or [`FREE_CLUSTER`].
    pub fn cluster_of(&self, site: &str) -> &str {
        self.clusters
            .iter()
            .find(|c| c.members.iter().any(|m| m == site))
            .map(|c| c.name.as_str())
            .unwrap_or(FREE_CLUSTER)
    }

    pub fn site_iter(&self, selection: Selection) -> impl Iterator<Item = &Site> {
        self.sites
            .iter()
            .filter(move |s| selection == Selection::All || s.select)
    }

    pub fn site_iter_mut(&mut self) -> impl Iterator<Item = &mut Site> {
        self.sites.iter_mut()
    }

    /// Optimisation units in storage order: named clusters first, then each
    /// free site on its own. Only selected sites are yielded and units without
    /// any selected site are skipped.
    pub fn cluster_iter(&self) -> Vec<(ClusterId, Vec<&Site>)> {
        let mut out = Vec::new();
        for c in &self.clusters {
            let sites: Vec<&Site> = c
                .members
                .iter()
                .filter_map(|m| self.get(m))
                .filter(|s| s.select)
                .collect();
            if !sites.is_empty() {
                out.push((ClusterId::named(&c.name), sites));
            }
        }
        for s in &self.sites {
            if s.select && self.cluster_of(&s.id) == FREE_CLUSTER {
                out.push((ClusterId::free(&s.id), vec![s]));
            }
        }
        out
    }

    /// Site ids of an optimisation unit (selected or not).
    pub fn members(&self, cluster: &ClusterId) -> Vec<String> {
        if let Some(site) = cluster.0.strip_prefix("free:") {
            return vec![site.to_string()];
        }
        self.clusters
            .iter()
            .find(|c| c.name == cluster.0)
            .map(|c| c.members.clone())
            .unwrap_or_default()
    }

    /// Replace a site wholesale with a worker's copy.
    pub fn replace(&mut self, site: Site) -> Result<(), AppError> {
        match self.index.get(&site.id) {
            Some(&i) => {
                self.sites[i] = site;
                Ok(())
            }
            None => Err(AppError::invalid(format!(
                "Cannot merge results for unknown site '{}'.",
                site.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ids: &[&str]) -> SiteStore {
        SiteStore::new(ids.iter().map(|id| Site::new(*id)).collect()).unwrap()
    }

    #[test]
    fn free_sites_are_singleton_units() {
        let mut s = store(&["a", "b", "c", "d"]);
        s.cluster("C1", &["b".into(), "d".into()]).unwrap();

        let units = s.cluster_iter();
        let ids: Vec<&str> = units.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "free:a", "free:c"]);
        assert_eq!(units[0].1.len(), 2);
        assert_eq!(s.cluster_of("d"), "C1");
        assert_eq!(s.cluster_of("a"), FREE_CLUSTER);
    }

    #[test]
    fn reclustering_moves_sites_and_drops_empty_clusters() {
        let mut s = store(&["a", "b"]);
        s.cluster("C1", &["a".into()]).unwrap();
        s.cluster("C2", &["a".into(), "b".into()]).unwrap();
        assert_eq!(s.cluster_of("a"), "C2");
        assert_eq!(s.members(&ClusterId::named("C1")), Vec::<String>::new());

        s.cluster(FREE_CLUSTER, &["a".into(), "b".into()]).unwrap();
        assert_eq!(s.cluster_iter().len(), 2);
    }

    #[test]
    fn deselected_sites_are_skipped() {
        let mut s = store(&["a", "b"]);
        s.cluster("C1", &["a".into(), "b".into()]).unwrap();
        if let Some(site) = s.get_mut("a") {
            site.select = false;
        }
        let units = s.cluster_iter();
        assert_eq!(units[0].1.len(), 1);
        assert_eq!(s.site_iter(Selection::Selected).count(), 1);
        assert_eq!(s.site_iter(Selection::All).count(), 2);
    }

    #[test]
    fn duplicate_and_unknown_sites_rejected() {
        assert!(SiteStore::new(vec![Site::new("a"), Site::new("a")]).is_err());
        let mut s = store(&["a"]);
        assert!(s.cluster("C1", &["zz".into()]).is_err());
    }
}
