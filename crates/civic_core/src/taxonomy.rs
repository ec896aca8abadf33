use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct OrgNode {
    pub name: String,
    #[serde(default)]
    pub children: BTreeMap<String, OrgNode>,
}

/// Organization hierarchy plus the raw-label lookup table used by scrapers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub organizations: BTreeMap<String, OrgNode>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableOrg {
    pub key: String,
    pub name: String,
}

impl Taxonomy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut taxonomy: Taxonomy = serde_yaml::from_str(raw)?;
        taxonomy.labels = taxonomy
            .labels
            .into_iter()
            .map(|(label, key)| (normalize_label(&label), key))
            .collect();
        Ok(taxonomy)
    }

    /// Leaf organizations as dot keys, in key order.
    pub fn selectable_orgs(&self) -> Vec<SelectableOrg> {
        let mut out = Vec::new();
        collect_leaves(&self.organizations, "", &mut out);
        out
    }

    pub fn name_of(&self, key: &str) -> Option<&str> {
        self.node(key).map(|node| node.name.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.node(key).is_some()
    }

    /// Maps a raw source label such as "Committee on Finance" to its canonical key.
    pub fn resolve_label(&self, raw: &str) -> Option<&str> {
        self.labels.get(&normalize_label(raw)).map(String::as_str)
    }

    fn node(&self, key: &str) -> Option<&OrgNode> {
        let mut parts = key.split('.');
        let mut current = self.organizations.get(parts.next()?)?;
        for part in parts {
            current = current.children.get(part)?;
        }
        Some(current)
    }
}

fn collect_leaves(nodes: &BTreeMap<String, OrgNode>, prefix: &str, out: &mut Vec<SelectableOrg>) {
    for (key, node) in nodes {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if node.children.is_empty() {
            out.push(SelectableOrg {
                key: full,
                name: node.name.clone(),
            });
        } else {
            collect_leaves(&node.children, &full, out);
        }
    }
}

fn normalize_label(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
