// Dependency Graph (validation + topological ordering)

use std::collections::{HashMap, HashSet};

use crate::domain::error::{DomainError, Result};
use crate::domain::service::{ServiceName, ServiceSpec};

/// Validated dependency graph over a set of service specs
///
/// Edges point from a service to its predecessors (`depends_on`).
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<ServiceName>,
    predecessors: HashMap<ServiceName, Vec<ServiceName>>,
    dependents: HashMap<ServiceName, Vec<ServiceName>>,
    depth: HashMap<ServiceName, usize>,
}

impl DependencyGraph {
    /// Build and validate the graph
    ///
    /// Ties in the topological order follow declaration order, so a spec list
    /// that is already ordered starts exactly as written.
    ///
    /// # Errors
    /// - DomainError::DuplicateService if two specs share a name
    /// - DomainError::UnknownDependency if a predecessor is not declared
    /// - DomainError::CyclicDependency if no valid order exists
    pub fn build(specs: &[ServiceSpec]) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(DomainError::DuplicateService(spec.name.clone()));
            }
        }

        let mut predecessors: HashMap<ServiceName, Vec<ServiceName>> = HashMap::new();
        let mut dependents: HashMap<ServiceName, Vec<ServiceName>> = HashMap::new();
        for spec in specs {
            let mut preds: Vec<ServiceName> = Vec::new();
            for dep in &spec.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(DomainError::UnknownDependency {
                        service: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !preds.contains(dep) {
                    preds.push(dep.clone());
                    dependents
                        .entry(dep.clone())
                        .or_default()
                        .push(spec.name.clone());
                }
            }
            predecessors.insert(spec.name.clone(), preds);
        }

        // Kahn's algorithm, picking the earliest declared ready node each round
        let mut remaining: Vec<&ServiceName> = specs.iter().map(|s| &s.name).collect();
        let mut in_degree: HashMap<&ServiceName, usize> = remaining
            .iter()
            .map(|name| (*name, predecessors[*name].len()))
            .collect();
        let mut order = Vec::with_capacity(specs.len());
        let mut depth: HashMap<ServiceName, usize> = HashMap::new();

        while let Some(pos) = remaining.iter().position(|name| in_degree[*name] == 0) {
            let name = remaining.remove(pos);
            let level = predecessors[name]
                .iter()
                .map(|p| depth[p] + 1)
                .max()
                .unwrap_or(0);
            depth.insert(name.clone(), level);
            if let Some(children) = dependents.get(name) {
                for child in children {
                    if let Some(d) = in_degree.get_mut(child) {
                        *d -= 1;
                    }
                }
            }
            order.push(name.clone());
        }

        if !remaining.is_empty() {
            let cycle = Self::find_cycle(&remaining, &predecessors);
            return Err(DomainError::CyclicDependency { cycle });
        }

        Ok(Self {
            order,
            predecessors,
            dependents,
            depth,
        })
    }

    /// Walk predecessor edges among unresolved nodes until a node repeats
    fn find_cycle(
        remaining: &[&ServiceName],
        predecessors: &HashMap<ServiceName, Vec<ServiceName>>,
    ) -> Vec<ServiceName> {
        let unresolved: HashSet<&ServiceName> = remaining.iter().copied().collect();
        let mut path: Vec<ServiceName> = Vec::new();
        let mut current = remaining[0].clone();

        loop {
            if let Some(idx) = path.iter().position(|n| *n == current) {
                let mut cycle = path.split_off(idx);
                cycle.push(current);
                return cycle;
            }
            path.push(current.clone());
            // Every unresolved node keeps at least one unresolved predecessor
            match predecessors[&current]
                .iter()
                .find(|p| unresolved.contains(p))
            {
                Some(next) => current = next.clone(),
                None => return path,
            }
        }
    }

    /// Services in dependency order (predecessors first)
    pub fn order(&self) -> &[ServiceName] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predecessors.contains_key(name)
    }

    /// Direct predecessors of a service
    pub fn predecessors(&self, name: &str) -> &[ServiceName] {
        self.predecessors
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Direct dependents of a service
    pub fn dependents(&self, name: &str) -> &[ServiceName] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All services that depend on `name` directly or indirectly, in dependency order
    pub fn transitive_dependents(&self, name: &str) -> Vec<ServiceName> {
        let mut affected: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            for child in self.dependents(current) {
                if affected.insert(child.as_str()) {
                    stack.push(child.as_str());
                }
            }
        }
        self.order
            .iter()
            .filter(|n| affected.contains(n.as_str()))
            .cloned()
            .collect()
    }

    /// Length of the longest predecessor chain below `name` (roots are 0)
    pub fn depth(&self, name: &str) -> usize {
        self.depth.get(name).copied().unwrap_or(0)
    }

    /// Group services into stop waves, deepest dependents first
    ///
    /// Input order is preserved inside each wave.
    pub fn shutdown_waves(&self, names: &[ServiceName]) -> Vec<Vec<ServiceName>> {
        let mut levels: Vec<usize> = names.iter().map(|n| self.depth(n)).collect();
        levels.sort_unstable();
        levels.dedup();

        levels
            .into_iter()
            .rev()
            .map(|level| {
                names
                    .iter()
                    .filter(|n| self.depth(n) == level)
                    .cloned()
                    .collect()
            })
            .collect()
    }
}
