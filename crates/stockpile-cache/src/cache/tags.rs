//! Tag graph: which key namespaces a tag owns and which tags it cascades to.
//!
//! Tags are hierarchical strings (`orders`, `orders:42`). A cascade rule keyed
//! on `orders` applies to `orders:42` too. The graph is validated once, at
//! build time; invalidation never walks it recursively.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::error;

/// Well-known ERP tags.
pub mod names {
    pub const ORDERS: &str = "orders";
    pub const INVENTORY: &str = "inventory";
    pub const PRODUCTS: &str = "products";
    pub const SUPPLIERS: &str = "suppliers";
    pub const PAYMENTS: &str = "payments";
    pub const FINANCE: &str = "finance";
    pub const DASHBOARD: &str = "dashboard";
    pub const SETTINGS: &str = "settings";
}

/// How far an invalidation cascades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeMode {
    /// Direct dependents only.
    #[default]
    OneHop,
    /// Every tag reachable from the source, precomputed at build time.
    Closure,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagGraphError {
    #[error("tag '{0}' cascades to itself")]
    SelfLoop(String),

    #[error("cascade cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Keys owned by one namespace: the bare key and the glob for keys below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScope {
    pub exact: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub struct TagGraph {
    /// Rule key -> targets, already expanded according to `mode`.
    cascade: BTreeMap<String, Vec<String>>,
    namespaces: BTreeMap<String, Vec<String>>,
    mode: CascadeMode,
}

impl TagGraph {
    pub fn builder() -> TagGraphBuilder {
        TagGraphBuilder::default()
    }

    /// A graph with no cascade rules.
    pub fn empty() -> Self {
        Self {
            cascade: BTreeMap::new(),
            namespaces: BTreeMap::new(),
            mode: CascadeMode::OneHop,
        }
    }

    /// The ERP's standard dependency table.
    pub fn erp_default() -> Self {
        match Self::erp_builder().build() {
            Ok(graph) => graph,
            Err(e) => {
                error!(error = %e, "built-in cascade table is invalid, cascading disabled");
                Self::empty()
            }
        }
    }

    pub(crate) fn erp_builder() -> TagGraphBuilder {
        use names::*;
        TagGraph::builder()
            .cascade(ORDERS, [INVENTORY, DASHBOARD, FINANCE])
            .cascade(PAYMENTS, [ORDERS, FINANCE, DASHBOARD])
            .cascade(SUPPLIERS, [INVENTORY])
            .cascade(INVENTORY, [DASHBOARD])
            .cascade(PRODUCTS, [INVENTORY, DASHBOARD])
            .cascade(SETTINGS, [DASHBOARD])
            .owns(DASHBOARD, DASHBOARD)
            .owns(DASHBOARD, "stats")
    }

    pub fn mode(&self) -> CascadeMode {
        self.mode
    }

    /// Tags to invalidate alongside `tag`, each once, never `tag` itself.
    pub fn dependents(&self, tag: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (rule, targets) in &self.cascade {
            if !tag_matches(tag, rule) {
                continue;
            }
            for target in targets {
                if target != tag && seen.insert(target.as_str()) {
                    out.push(target.clone());
                }
            }
        }
        out
    }

    /// Namespaces whose keys `tag` owns.
    pub fn namespaces(&self, tag: &str) -> Vec<String> {
        match self.namespaces.get(tag) {
            Some(owned) if !owned.is_empty() => owned.clone(),
            _ => vec![tag.to_string()],
        }
    }

    /// Store keys cleared for `tag`: each owned namespace and everything under it.
    pub fn key_scopes(&self, tag: &str) -> Vec<KeyScope> {
        self.namespaces(tag)
            .into_iter()
            .map(|ns| KeyScope {
                pattern: format!("{}:*", escape_glob(&ns)),
                exact: ns,
            })
            .collect()
    }

    /// Cascade table as configured (after closure expansion, if any).
    pub fn rules(&self) -> &BTreeMap<String, Vec<String>> {
        &self.cascade
    }
}

impl Default for TagGraph {
    fn default() -> Self {
        Self::erp_default()
    }
}

/// `tag` equals `rule` or sits below it (`orders:42` under `orders`).
fn tag_matches(tag: &str, rule: &str) -> bool {
    tag == rule
        || (tag.len() > rule.len()
            && tag.starts_with(rule)
            && tag.as_bytes()[rule.len()] == b':')
}

/// Escape glob metacharacters so a namespace is matched literally.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Default, Clone)]
pub struct TagGraphBuilder {
    edges: BTreeMap<String, Vec<String>>,
    namespaces: BTreeMap<String, Vec<String>>,
    mode: CascadeMode,
    allow_cycles: bool,
}

impl TagGraphBuilder {
    /// Invalidating `from` also invalidates each of `to`.
    pub fn cascade<I, S>(mut self, from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = self.edges.entry(from.into()).or_default();
        for t in to {
            let t = t.into();
            if !targets.contains(&t) {
                targets.push(t);
            }
        }
        self
    }

    /// `tag` owns keys in `namespace`.
    pub fn owns(mut self, tag: impl Into<String>, namespace: impl Into<String>) -> Self {
        let owned = self.namespaces.entry(tag.into()).or_default();
        let namespace = namespace.into();
        if !owned.contains(&namespace) {
            owned.push(namespace);
        }
        self
    }

    pub fn mode(mut self, mode: CascadeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Accept cycles; they are flattened, which forces [`CascadeMode::Closure`].
    pub fn allow_cycles(mut self, allow: bool) -> Self {
        self.allow_cycles = allow;
        self
    }

    pub fn build(self) -> Result<TagGraph, TagGraphError> {
        for (from, targets) in &self.edges {
            if targets.iter().any(|t| t == from) {
                return Err(TagGraphError::SelfLoop(from.clone()));
            }
        }

        let mut mode = self.mode;
        if let Some(cycle) = find_cycle(&self.edges) {
            if !self.allow_cycles {
                return Err(TagGraphError::Cycle(cycle));
            }
            tracing::info!(cycle = %cycle.join(" -> "), "cascade cycle flattened into closure");
            mode = CascadeMode::Closure;
        }

        let cascade = match mode {
            CascadeMode::OneHop => self.edges,
            CascadeMode::Closure => transitive_closure(&self.edges),
        };

        Ok(TagGraph {
            cascade,
            namespaces: self.namespaces,
            mode,
        })
    }
}

/// First cycle found by depth-first search, as the path that closes it.
fn find_cycle(edges: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &'a BTreeMap<String, Vec<String>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        path.push(node);
        if let Some(targets) = edges.get(node) {
            for t in targets {
                if let Some(cycle) = visit(t, edges, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in edges.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Every tag reachable from each rule key, breadth-first, source excluded.
fn transitive_closure(edges: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    edges
        .keys()
        .map(|source| {
            let mut seen: HashSet<&str> = HashSet::from([source.as_str()]);
            let mut order = Vec::new();
            let mut frontier: Vec<&str> = vec![source.as_str()];
            while !frontier.is_empty() {
                let mut next = Vec::new();
                for node in frontier {
                    for t in edges.get(node).into_iter().flatten() {
                        if seen.insert(t.as_str()) {
                            order.push(t.clone());
                            next.push(t.as_str());
                        }
                    }
                }
                frontier = next;
            }
            (source.clone(), order)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_is_valid_in_every_mode() {
        assert!(TagGraph::erp_builder().build().is_ok());
        assert!(TagGraph::erp_builder().mode(CascadeMode::Closure).build().is_ok());

        let graph = TagGraph::erp_default();
        assert!(!graph.dependents(names::PAYMENTS).is_empty());
        assert_eq!(graph.dependents(names::SUPPLIERS), vec![names::INVENTORY]);
    }

    #[test]
    fn one_hop_dependents() {
        let graph = TagGraph::builder()
            .cascade("orders", ["inventory", "dashboard"])
            .cascade("inventory", ["reports"])
            .build()
            .unwrap();
        assert_eq!(graph.dependents("orders"), vec!["inventory", "dashboard"]);
        assert!(graph.dependents("dashboard").is_empty());
    }

    #[test]
    fn prefix_rules_apply_to_entity_tags() {
        let graph = TagGraph::builder()
            .cascade("orders", ["inventory"])
            .build()
            .unwrap();
        assert_eq!(graph.dependents("orders:42"), vec!["inventory"]);
        assert!(graph.dependents("ordersx").is_empty());
    }

    #[test]
    fn entity_rule_and_root_rule_are_merged() {
        let graph = TagGraph::builder()
            .cascade("orders", ["inventory", "dashboard"])
            .cascade("orders:42", ["dashboard", "finance"])
            .build()
            .unwrap();
        assert_eq!(
            graph.dependents("orders:42"),
            vec!["inventory", "dashboard", "finance"]
        );
    }

    #[test]
    fn closure_mode_flattens_chains() {
        let graph = TagGraph::builder()
            .cascade("orders", ["inventory"])
            .cascade("inventory", ["dashboard"])
            .cascade("dashboard", ["stats"])
            .mode(CascadeMode::Closure)
            .build()
            .unwrap();
        assert_eq!(
            graph.dependents("orders"),
            vec!["inventory", "dashboard", "stats"]
        );
    }

    #[test]
    fn cycles_are_rejected_by_default() {
        let err = TagGraph::builder()
            .cascade("orders", ["inventory"])
            .cascade("inventory", ["orders"])
            .build()
            .unwrap_err();
        match err {
            TagGraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"orders".to_string()));
                assert!(path.contains(&"inventory".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allowed_cycles_are_flattened() {
        let graph = TagGraph::builder()
            .cascade("orders", ["inventory"])
            .cascade("inventory", ["payments"])
            .cascade("payments", ["orders"])
            .allow_cycles(true)
            .build()
            .unwrap();
        assert_eq!(graph.mode(), CascadeMode::Closure);
        assert_eq!(graph.dependents("orders"), vec!["inventory", "payments"]);
        assert_eq!(graph.dependents("payments"), vec!["orders", "inventory"]);
    }

    #[test]
    fn self_loop_is_always_rejected() {
        let err = TagGraph::builder()
            .cascade("orders", ["orders"])
            .allow_cycles(true)
            .build()
            .unwrap_err();
        assert_eq!(err, TagGraphError::SelfLoop("orders".into()));
    }

    fn scope(exact: &str, pattern: &str) -> KeyScope {
        KeyScope {
            exact: exact.to_string(),
            pattern: pattern.to_string(),
        }
    }

    #[test]
    fn key_scopes_default_to_tag() {
        let graph = TagGraph::empty();
        assert_eq!(graph.key_scopes("orders"), vec![scope("orders", "orders:*")]);
        assert_eq!(
            graph.key_scopes("orders:42"),
            vec![scope("orders:42", "orders:42:*")]
        );
    }

    #[test]
    fn key_scopes_use_owned_namespaces() {
        let graph = TagGraph::erp_default();
        assert_eq!(
            graph.key_scopes("dashboard"),
            vec![
                scope("dashboard", "dashboard:*"),
                scope("stats", "stats:*")
            ]
        );
    }

    #[test]
    fn erp_default_is_one_hop() {
        let graph = TagGraph::erp_default();
        assert_eq!(graph.mode(), CascadeMode::OneHop);
        assert_eq!(
            graph.dependents("payments"),
            vec!["orders", "finance", "dashboard"]
        );
        assert_eq!(
            graph.dependents("orders:17"),
            vec!["inventory", "dashboard", "finance"]
        );
    }

    #[test]
    fn escape_glob_metacharacters() {
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }
}
