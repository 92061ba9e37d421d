//! Requirement graph traversal
//!
//! Computes the start order of a module's requirement closure and finds
//! requirement cycles. Works on descriptors only; module state is the
//! caller's concern.

use crate::descriptor::Descriptor;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors in a module's requirement closure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("Module '{0}' is not registered")]
    UnknownModule(String),

    #[error("Module '{missing}' is not registered (required via {})", .chain.join(" -> "))]
    MissingRequirement { missing: String, chain: Vec<String> },

    #[error(
        "Module '{module}' version {found} does not satisfy '{constraint}' required by '{required_by}' (required via {})",
        .chain.join(" -> ")
    )]
    VersionMismatch {
        module: String,
        required_by: String,
        constraint: String,
        found: String,
        chain: Vec<String>,
    },

    #[error("Requirement cycle: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("Module '{module}' is disabled (required via {})", .chain.join(" -> "))]
    Disabled { module: String, chain: Vec<String> },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Start order of `root` and everything it requires, leaves first
///
/// The root is the last element. Each module appears once even when
/// required along several paths.
pub fn resolve_start_order<'a, F>(root: &str, lookup: F) -> Result<Vec<String>, DependencyError>
where
    F: Fn(&str) -> Option<&'a Descriptor>,
{
    if lookup(root).is_none() {
        return Err(DependencyError::UnknownModule(root.to_string()));
    }

    let mut walk = Walk {
        lookup,
        marks: HashMap::new(),
        path: Vec::new(),
        order: Vec::new(),
    };
    walk.visit(root)?;
    Ok(walk.order)
}

struct Walk<F> {
    lookup: F,
    marks: HashMap<String, Mark>,
    path: Vec<String>,
    order: Vec<String>,
}

impl<'a, F> Walk<F>
where
    F: Fn(&str) -> Option<&'a Descriptor>,
{
    fn visit(&mut self, id: &str) -> Result<(), DependencyError> {
        match self.marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|p| p == id).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(id.to_string());
                return Err(DependencyError::Cycle { cycle });
            }
            None => {}
        }

        let descriptor = (self.lookup)(id).ok_or_else(|| DependencyError::MissingRequirement {
            missing: id.to_string(),
            chain: self.chain_to(id),
        })?;

        if !descriptor.is_enabled() {
            return Err(DependencyError::Disabled {
                module: id.to_string(),
                chain: self.chain_to(id),
            });
        }

        self.marks.insert(id.to_string(), Mark::Visiting);
        self.path.push(id.to_string());

        for requirement in descriptor.requirements() {
            if let (Some(constraint), Some(target)) =
                (&requirement.version, (self.lookup)(&requirement.id))
            {
                if !constraint.matches(target.version()) {
                    return Err(DependencyError::VersionMismatch {
                        module: requirement.id.clone(),
                        required_by: id.to_string(),
                        constraint: constraint.as_str().to_string(),
                        found: target
                            .version()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "none".to_string()),
                        chain: self.chain_to(&requirement.id),
                    });
                }
            }
            self.visit(&requirement.id)?;
        }

        self.path.pop();
        self.marks.insert(id.to_string(), Mark::Done);
        self.order.push(id.to_string());
        Ok(())
    }

    fn chain_to(&self, id: &str) -> Vec<String> {
        let mut chain = self.path.clone();
        chain.push(id.to_string());
        chain
    }
}

/// Every distinct requirement cycle reachable from `roots`
///
/// Missing requirements are skipped. Each cycle is rotated to start at its
/// smallest id and closes on it, e.g. `["a", "b", "a"]`.
pub fn find_cycles<'a, I, S, F>(roots: I, lookup: F) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: Fn(&str) -> Option<&'a Descriptor>,
{
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut found: BTreeSet<Vec<String>> = BTreeSet::new();

    for root in roots {
        let mut path = Vec::new();
        collect_cycles(root.as_ref(), &lookup, &mut marks, &mut path, &mut found);
    }

    found.into_iter().collect()
}

fn collect_cycles<'a, F>(
    id: &str,
    lookup: &F,
    marks: &mut HashMap<String, Mark>,
    path: &mut Vec<String>,
    found: &mut BTreeSet<Vec<String>>,
) where
    F: Fn(&str) -> Option<&'a Descriptor>,
{
    match marks.get(id) {
        Some(Mark::Done) => return,
        Some(Mark::Visiting) => {
            if let Some(start) = path.iter().position(|p| p == id) {
                found.insert(normalize(&path[start..]));
            }
            return;
        }
        None => {}
    }

    let Some(descriptor) = lookup(id) else {
        return;
    };

    marks.insert(id.to_string(), Mark::Visiting);
    path.push(id.to_string());
    for requirement in descriptor.requirements() {
        collect_cycles(&requirement.id, lookup, marks, path, found);
    }
    path.pop();
    marks.insert(id.to_string(), Mark::Done);
}

fn normalize(members: &[String]) -> Vec<String> {
    let pivot = members
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(index, _)| index)
        .unwrap_or(0);
    let mut cycle: Vec<String> = members[pivot..]
        .iter()
        .chain(members[..pivot].iter())
        .cloned()
        .collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Graph(BTreeMap<String, Descriptor>);

    impl Graph {
        fn new() -> Self {
            Self(BTreeMap::new())
        }

        fn add(mut self, descriptor: Descriptor) -> Self {
            self.0.insert(descriptor.id().to_string(), descriptor);
            self
        }

        fn order(&self, root: &str) -> Result<Vec<String>, DependencyError> {
            resolve_start_order(root, |id| self.0.get(id))
        }
    }

    fn module(id: &str, requires: &[&str]) -> Descriptor {
        let mut builder = Descriptor::builder(id).location(format!("/m/{id}"));
        for r in requires {
            builder = builder.requires(*r);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_diamond_starts_leaves_first_once() {
        let graph = Graph::new()
            .add(module("core", &[]))
            .add(module("data", &["core"]))
            .add(module("io", &["core"]))
            .add(module("app", &["data", "io"]));

        assert_eq!(graph.order("app").unwrap(), vec!["core", "data", "io", "app"]);
        assert_eq!(graph.order("core").unwrap(), vec!["core"]);
    }

    #[test]
    fn test_cycle_is_reported_with_members() {
        let graph = Graph::new()
            .add(module("a", &["b"]))
            .add(module("b", &["c"]))
            .add(module("c", &["a"]));

        assert_eq!(
            graph.order("a"),
            Err(DependencyError::Cycle {
                cycle: vec!["a".into(), "b".into(), "c".into(), "a".into()]
            })
        );
    }

    #[test]
    fn test_missing_requirement_carries_chain() {
        let graph = Graph::new()
            .add(module("app", &["io"]))
            .add(module("io", &["codec"]));

        assert_eq!(
            graph.order("app"),
            Err(DependencyError::MissingRequirement {
                missing: "codec".into(),
                chain: vec!["app".into(), "io".into(), "codec".into()]
            })
        );
        assert_eq!(
            graph.order("nope"),
            Err(DependencyError::UnknownModule("nope".into()))
        );
    }

    #[test]
    fn test_version_mismatch() {
        let graph = Graph::new()
            .add(
                Descriptor::builder("core")
                    .version("1.4")
                    .location("/m/core")
                    .build()
                    .unwrap(),
            )
            .add(
                Descriptor::builder("app")
                    .requires_version("core", "^2")
                    .location("/m/app")
                    .build()
                    .unwrap(),
            )
            .add(
                Descriptor::builder("tool")
                    .requires_version("core", ">=1.2")
                    .location("/m/tool")
                    .build()
                    .unwrap(),
            );

        let err = graph.order("app").unwrap_err();
        assert!(matches!(err, DependencyError::VersionMismatch { ref found, .. } if found == "1.4"));
        assert_eq!(graph.order("tool").unwrap(), vec!["core", "tool"]);
    }

    #[test]
    fn test_deep_version_mismatch_carries_chain() {
        let graph = Graph::new()
            .add(
                Descriptor::builder("core")
                    .version("1.0")
                    .location("/m/core")
                    .build()
                    .unwrap(),
            )
            .add(
                Descriptor::builder("io")
                    .requires_version("core", "^2")
                    .location("/m/io")
                    .build()
                    .unwrap(),
            )
            .add(module("view", &["io"]))
            .add(module("app", &["view"]));

        let err = graph.order("app").unwrap_err();
        assert_eq!(
            err,
            DependencyError::VersionMismatch {
                module: "core".into(),
                required_by: "io".into(),
                constraint: "^2".into(),
                found: "1.0".into(),
                chain: vec!["app".into(), "view".into(), "io".into(), "core".into()],
            }
        );
        assert!(err.to_string().contains("app -> view -> io -> core"));
    }

    #[test]
    fn test_disabled_requirement() {
        let mut core = module("core", &[]);
        core.set_enabled(false);
        let graph = Graph::new().add(core).add(module("app", &["core"]));

        assert!(matches!(
            graph.order("app"),
            Err(DependencyError::Disabled { ref module, .. }) if module == "core"
        ));
    }

    #[test]
    fn test_find_cycles_dedupes_rotations() {
        let graph = Graph::new()
            .add(module("b", &["a"]))
            .add(module("a", &["b"]))
            .add(module("x", &["a", "ghost"]))
            .add(module("solo", &[]));

        let cycles = find_cycles(["x", "b", "a", "solo"], |id| graph.0.get(id));
        assert_eq!(cycles, vec![vec!["a".to_string(), "b".into(), "a".into()]]);
        assert!(find_cycles(["solo"], |id| graph.0.get(id)).is_empty());
    }
}
