//! Builds a [`DependencyGraph`] from a scenario, the known tests and the
//! active jig.
//!
//! Provides aliases are resolved in two phases. First every compatible test
//! is indexed under its own name and each alias it provides. Then every
//! reference is resolved to exactly one test; an alias with several
//! candidates is only accepted when one of them has already been selected.
//! Nodes are emitted in depth-first post-order, so a dependency lands right
//! before the first test that needed it.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{DependencyGraph, GraphNode};
use crate::error::GraphError;
use crate::types::scenario::ScenarioDef;
use crate::types::test::TestDef;
use crate::types::unit::UnitKind;

enum Resolved {
    Assumed(String),
    Test(String),
    Incompatible(String),
    Unknown,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done(usize),
}

struct Builder<'a> {
    scenario: &'a ScenarioDef,
    jig: &'a str,
    compatible: HashMap<&'a str, &'a TestDef>,
    incompatible: HashMap<&'a str, &'a TestDef>,
    providers: HashMap<String, Vec<&'a str>>,
    selected: HashSet<String>,
    marks: HashMap<String, Mark>,
    stack: Vec<String>,
    nodes: Vec<GraphNode>,
}

/// Resolve `scenario` against `tests` for `jig`. All errors are fatal and
/// surface before any process is spawned.
pub fn build(
    tests: &[TestDef],
    scenario: &ScenarioDef,
    jig: &str,
) -> Result<DependencyGraph, GraphError> {
    let mut b = Builder::index(tests, scenario, jig);
    for name in &scenario.tests {
        let target = match b.resolve(name)? {
            Resolved::Assumed(n) | Resolved::Test(n) => n,
            Resolved::Incompatible(test) => {
                return Err(GraphError::IncompatibleJig {
                    test,
                    jig: jig.to_string(),
                })
            }
            Resolved::Unknown => {
                return Err(GraphError::UnknownUnit {
                    name: name.clone(),
                })
            }
        };
        b.visit(&target)?;
    }
    debug!(
        scenario = %scenario.name,
        jig,
        nodes = b.nodes.len(),
        "dependency graph built"
    );
    Ok(DependencyGraph::new(&scenario.name, jig, b.nodes))
}

impl<'a> Builder<'a> {
    fn index(tests: &'a [TestDef], scenario: &'a ScenarioDef, jig: &'a str) -> Self {
        let mut compatible = HashMap::new();
        let mut incompatible = HashMap::new();
        let mut providers: HashMap<String, Vec<&'a str>> = HashMap::new();

        for test in tests {
            if !test.compatible_with(jig) {
                incompatible.insert(test.name.as_str(), test);
                continue;
            }
            compatible.insert(test.name.as_str(), test);
            for alias in &test.provides {
                let alias = UnitKind::Test.base_name(alias).to_string();
                let entry = providers.entry(alias).or_default();
                if !entry.contains(&test.name.as_str()) {
                    entry.push(test.name.as_str());
                }
            }
        }

        // Tests named directly by the scenario count as prior selections.
        let selected = scenario
            .tests
            .iter()
            .map(|t| UnitKind::Test.base_name(t))
            .filter(|t| compatible.contains_key(t))
            .map(|t| t.to_string())
            .collect();

        Builder {
            scenario,
            jig,
            compatible,
            incompatible,
            providers,
            selected,
            marks: HashMap::new(),
            stack: Vec::new(),
            nodes: Vec::new(),
        }
    }

    fn resolve(&mut self, reference: &str) -> Result<Resolved, GraphError> {
        let name = UnitKind::Test.base_name(reference);

        if self.scenario.is_assumed(name) {
            return Ok(Resolved::Assumed(name.to_string()));
        }
        if self.compatible.contains_key(name) {
            self.selected.insert(name.to_string());
            return Ok(Resolved::Test(name.to_string()));
        }

        if let Some(candidates) = self.providers.get(name) {
            let chosen = match candidates.as_slice() {
                [only] => Some(only.to_string()),
                _ => {
                    let picked: Vec<&&str> = candidates
                        .iter()
                        .filter(|c| self.selected.contains(**c))
                        .collect();
                    match picked.as_slice() {
                        [only] => Some(only.to_string()),
                        _ => None,
                    }
                }
            };
            return match chosen {
                Some(test) => {
                    self.selected.insert(test.clone());
                    Ok(Resolved::Test(test))
                }
                None => {
                    let mut candidates: Vec<String> =
                        candidates.iter().map(|c| c.to_string()).collect();
                    candidates.sort();
                    Err(GraphError::AmbiguousProvider {
                        alias: name.to_string(),
                        candidates,
                    })
                }
            };
        }

        if self.incompatible.contains_key(name) {
            return Ok(Resolved::Incompatible(name.to_string()));
        }
        let mut providers: Vec<&str> = self
            .incompatible
            .values()
            .filter(|t| t.provides.iter().any(|p| UnitKind::Test.base_name(p) == name))
            .map(|t| t.name.as_str())
            .collect();
        providers.sort();
        if let Some(first) = providers.first() {
            return Ok(Resolved::Incompatible(first.to_string()));
        }
        Ok(Resolved::Unknown)
    }

    fn visit(&mut self, name: &str) -> Result<usize, GraphError> {
        match self.marks.get(name) {
            Some(Mark::Done(idx)) => return Ok(*idx),
            Some(Mark::Visiting) => {
                let start = self.stack.iter().position(|n| n == name).unwrap_or(0);
                let mut path: Vec<String> = self.stack[start..].to_vec();
                path.push(name.to_string());
                return Err(GraphError::CycleDetected { path });
            }
            None => {}
        }

        if self.scenario.is_assumed(name) {
            let test = self.compatible.get(name).map(|t| (*t).clone());
            return Ok(self.push(name, test, true, Vec::new(), Vec::new()));
        }

        let test: &'a TestDef = match self.compatible.get(name) {
            Some(t) => *t,
            None => {
                return Err(GraphError::UnknownUnit {
                    name: name.to_string(),
                })
            }
        };
        if let Err(e) = test.ready_pattern() {
            return Err(GraphError::InvalidReadyPattern {
                test: name.to_string(),
                error: e.to_string(),
            });
        }

        self.marks.insert(name.to_string(), Mark::Visiting);
        self.stack.push(name.to_string());

        let mut requires = Vec::new();
        for dep in &test.requires {
            let target = match self.resolve(dep)? {
                Resolved::Assumed(n) | Resolved::Test(n) => n,
                Resolved::Incompatible(t) => {
                    return Err(GraphError::IncompatibleJig {
                        test: t,
                        jig: self.jig.to_string(),
                    })
                }
                Resolved::Unknown => {
                    return Err(GraphError::UnknownUnit { name: dep.clone() })
                }
            };
            let idx = self.visit(&target)?;
            if !requires.contains(&idx) {
                requires.push(idx);
            }
        }

        let mut suggests = Vec::new();
        for dep in &test.suggests {
            let target = match self.resolve(dep)? {
                Resolved::Assumed(n) | Resolved::Test(n) => n,
                Resolved::Incompatible(_) | Resolved::Unknown => {
                    debug!(test = %name, suggests = %dep, "dropping unresolvable soft dependency");
                    continue;
                }
            };
            let idx = self.visit(&target)?;
            if !requires.contains(&idx) && !suggests.contains(&idx) {
                suggests.push(idx);
            }
        }

        self.stack.pop();
        Ok(self.push(name, Some(test.clone()), false, requires, suggests))
    }

    fn push(
        &mut self,
        name: &str,
        test: Option<TestDef>,
        assumed: bool,
        requires: Vec<usize>,
        suggests: Vec<usize>,
    ) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(GraphNode {
            name: name.to_string(),
            test,
            assumed,
            requires,
            suggests,
        });
        self.marks.insert(name.to_string(), Mark::Done(idx));
        idx
    }
}
