//! The method registry: a tree of services keyed by dotted path.
//!
//! Each node holds two maps, child services and leaf methods, both keyed by
//! path component. Leaves are either locally-implemented functions or
//! back-references to the provider session that published them. Provider
//! references are plain session ids resolved against the live-client table,
//! never ownership edges, so a dead provider can never be reached through
//! the registry once [`Registry::remove_provider`] has run.

use std::collections::HashMap;

use bbus_wire::Object;

use crate::session::ClientId;

/// A locally-implemented method: takes the full path it was called under
/// and the argument object, returns the result or `None` on failure.
pub type LocalHandler = fn(&str, &mut Object) -> Option<Object>;

/// A leaf in the registry.
pub enum MethodEntry {
    /// Implemented inside the daemon.
    Local(LocalHandler),
    /// Published by a provider session; `leaf` is the name the provider
    /// knows the method by, forwarded as the meta of provider calls.
    Remote { provider: ClientId, leaf: String },
}

/// Error inserting into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The leaf is already occupied.
    AlreadyRegistered,
    /// Empty path, empty component, or a component that is a method on one
    /// level and a service on another.
    InvalidPath,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyRegistered => write!(f, "method already registered"),
            RegistryError::InvalidPath => write!(f, "invalid method path"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Default)]
struct ServiceNode {
    children: HashMap<String, ServiceNode>,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.methods.is_empty()
    }
}

/// The rooted service tree.
#[derive(Default)]
pub struct Registry {
    root: ServiceNode,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, creating intermediate service nodes as needed.
    pub fn insert(&mut self, path: &str, entry: MethodEntry) -> Result<(), RegistryError> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(RegistryError::InvalidPath);
        }
        let (leaf, dirs) = parts.split_last().ok_or(RegistryError::InvalidPath)?;

        let mut node = &mut self.root;
        for part in dirs {
            if node.methods.contains_key(*part) {
                return Err(RegistryError::InvalidPath);
            }
            node = node.children.entry((*part).to_owned()).or_default();
        }
        if node.children.contains_key(*leaf) {
            return Err(RegistryError::InvalidPath);
        }
        if node.methods.contains_key(*leaf) {
            return Err(RegistryError::AlreadyRegistered);
        }
        node.methods.insert((*leaf).to_owned(), entry);
        Ok(())
    }

    /// Look up the entry under a dotted path.
    pub fn lookup(&self, path: &str) -> Option<&MethodEntry> {
        let mut parts = path.split('.');
        let leaf = parts.next_back()?;
        let mut node = &self.root;
        for part in parts {
            node = node.children.get(part)?;
        }
        node.methods.get(leaf)
    }

    /// Remove the entry under a dotted path, pruning service nodes left
    /// empty.
    pub fn remove(&mut self, path: &str) -> Option<MethodEntry> {
        let parts: Vec<&str> = path.split('.').collect();
        remove_in(&mut self.root, &parts)
    }

    /// Remove every remote entry owned by `provider`. Returns the number of
    /// entries removed.
    pub fn remove_provider(&mut self, provider: ClientId) -> usize {
        prune_provider(&mut self.root, provider)
    }

    /// All registered paths, dotted and sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_paths(&self.root, &mut String::new(), &mut out);
        out.sort();
        out
    }
}

fn remove_in(node: &mut ServiceNode, parts: &[&str]) -> Option<MethodEntry> {
    match parts {
        [] => None,
        [leaf] => node.methods.remove(*leaf),
        [head, rest @ ..] => {
            let child = node.children.get_mut(*head)?;
            let entry = remove_in(child, rest);
            if entry.is_some() && child.is_empty() {
                node.children.remove(*head);
            }
            entry
        }
    }
}

fn prune_provider(node: &mut ServiceNode, provider: ClientId) -> usize {
    let before = node.methods.len();
    node.methods
        .retain(|_, m| !matches!(m, MethodEntry::Remote { provider: p, .. } if *p == provider));
    let mut removed = before - node.methods.len();

    node.children.retain(|_, child| {
        removed += prune_provider(child, provider);
        !child.is_empty()
    });
    removed
}

fn collect_paths(node: &ServiceNode, prefix: &mut String, out: &mut Vec<String>) {
    for name in node.methods.keys() {
        if prefix.is_empty() {
            out.push(name.clone());
        } else {
            out.push(format!("{prefix}.{name}"));
        }
    }
    for (name, child) in &node.children {
        let saved = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(name);
        collect_paths(child, prefix, out);
        prefix.truncate(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &str, _: &mut Object) -> Option<Object> {
        None
    }

    fn remote(provider: ClientId, leaf: &str) -> MethodEntry {
        MethodEntry::Remote {
            provider,
            leaf: leaf.to_owned(),
        }
    }

    #[test]
    fn insert_then_lookup() {
        let mut reg = Registry::new();
        reg.insert("bbus.foo.bar", remote(1, "bar")).unwrap();

        match reg.lookup("bbus.foo.bar") {
            Some(MethodEntry::Remote { provider, leaf }) => {
                assert_eq!(*provider, 1);
                assert_eq!(leaf, "bar");
            }
            _ => panic!("expected the inserted remote entry"),
        }
        assert!(reg.lookup("bbus.foo.baz").is_none());
        assert!(reg.lookup("bbus.foo").is_none());
        assert!(reg.lookup("no.such.method").is_none());
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut reg = Registry::new();
        reg.insert("bbus.foo.bar", remote(1, "bar")).unwrap();
        assert_eq!(
            reg.insert("bbus.foo.bar", remote(2, "bar")),
            Err(RegistryError::AlreadyRegistered),
        );
    }

    #[test]
    fn component_cannot_be_both_service_and_method() {
        let mut reg = Registry::new();
        reg.insert("bbus.foo.bar", remote(1, "bar")).unwrap();
        // "bar" is a method; it cannot also become a service.
        assert_eq!(
            reg.insert("bbus.foo.bar.deeper", remote(1, "deeper")),
            Err(RegistryError::InvalidPath),
        );
        // "foo" is a service; it cannot also become a method.
        assert_eq!(
            reg.insert("bbus.foo", remote(1, "foo")),
            Err(RegistryError::InvalidPath),
        );
    }

    #[test]
    fn empty_components_are_rejected() {
        let mut reg = Registry::new();
        for bad in ["", ".", "a..b", ".a", "a."] {
            assert_eq!(
                reg.insert(bad, remote(1, "x")),
                Err(RegistryError::InvalidPath),
                "{bad:?} should be rejected",
            );
        }
    }

    #[test]
    fn remove_prunes_empty_nodes() {
        let mut reg = Registry::new();
        reg.insert("bbus.foo.bar", remote(1, "bar")).unwrap();
        reg.insert("bbus.echo", MethodEntry::Local(nop)).unwrap();

        assert!(reg.remove("bbus.foo.bar").is_some());
        assert!(reg.lookup("bbus.foo.bar").is_none());
        assert!(reg.remove("bbus.foo.bar").is_none());
        // The sibling under "bbus" survives the pruning of "foo".
        assert!(reg.lookup("bbus.echo").is_some());
    }

    #[test]
    fn remove_provider_sweeps_all_entries() {
        let mut reg = Registry::new();
        reg.insert("bbus.a.one", remote(7, "one")).unwrap();
        reg.insert("bbus.b.two", remote(7, "two")).unwrap();
        reg.insert("bbus.b.three", remote(8, "three")).unwrap();
        reg.insert("bbus.local", MethodEntry::Local(nop)).unwrap();

        assert_eq!(reg.remove_provider(7), 2);
        assert!(reg.lookup("bbus.a.one").is_none());
        assert!(reg.lookup("bbus.b.two").is_none());
        assert!(reg.lookup("bbus.b.three").is_some());
        assert!(reg.lookup("bbus.local").is_some());
        assert_eq!(reg.remove_provider(7), 0);
    }

    #[test]
    fn paths_are_dotted_and_sorted() {
        let mut reg = Registry::new();
        reg.insert("bbus.foo.bar", remote(1, "bar")).unwrap();
        reg.insert("bbus.bbusd.echo", MethodEntry::Local(nop)).unwrap();
        reg.insert("bbus.abc", MethodEntry::Local(nop)).unwrap();

        assert_eq!(
            reg.paths(),
            vec!["bbus.abc", "bbus.bbusd.echo", "bbus.foo.bar"],
        );
    }
}
