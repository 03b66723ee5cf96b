//! Dependency graph construction and topological ordering.
//!
//! Dependency edges are stored as id strings on the cells; this module
//! resolves them into index-based adjacency once and runs Kahn's algorithm
//! with deterministic tie-breaking: lower `priority` first, then file order.
//! Unknown dependency ids are ignored here; the linter reports them.

use super::model::Notebook;
use std::collections::HashSet;

/// Index-based dependency edges: `deps[i]` lists the cell indexes cell `i`
/// depends on.
pub fn dep_indexes(nb: &Notebook) -> Vec<Vec<usize>> {
    let by_id = nb.index_by_id();
    nb.cells
        .iter()
        .map(|c| {
            c.deps
                .iter()
                .filter_map(|d| by_id.get(d.as_str()).copied())
                .collect()
        })
        .collect()
}

/// Topological order over all cells. On a cycle, returns the ids of the
/// cells that sit on a cycle, sorted.
pub fn topo_order(nb: &Notebook) -> Result<Vec<usize>, Vec<String>> {
    let deps = dep_indexes(nb);
    let n = nb.cells.len();

    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, ds) in deps.iter().enumerate() {
        in_degree[i] = ds.len();
        for &d in ds {
            dependents[d].push(i);
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        // Deterministic tie-break: lowest priority, then file order.
        let pos = ready
            .iter()
            .enumerate()
            .min_by_key(|(_, &i)| (nb.cells[i].priority(), i))
            .map(|(p, _)| p)
            .unwrap();
        let current = ready.swap_remove(pos);
        order.push(current);

        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(next);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Leftovers include cells merely downstream of a cycle; narrow the
    // report to cells that can reach themselves.
    let leftover: HashSet<usize> = (0..n).filter(|i| !order.contains(i)).collect();
    let mut members: Vec<String> = leftover
        .iter()
        .filter(|&&i| reaches_self(i, &deps, &leftover))
        .map(|&i| nb.cells[i].id.clone())
        .collect();
    members.sort();
    Err(members)
}

/// Depth-first walk over dependency edges restricted to `scope`, checking
/// whether `start` is on a cycle.
fn reaches_self(start: usize, deps: &[Vec<usize>], scope: &HashSet<usize>) -> bool {
    let mut visited = HashSet::new();
    let mut stack: Vec<usize> = deps[start]
        .iter()
        .copied()
        .filter(|i| scope.contains(i))
        .collect();
    while let Some(v) = stack.pop() {
        if v == start {
            return true;
        }
        if visited.insert(v) {
            stack.extend(deps[v].iter().copied().filter(|i| scope.contains(i)));
        }
    }
    false
}

/// Transitive dependency closure of `roots`, including the roots.
pub fn transitive_closure(nb: &Notebook, roots: &[usize]) -> HashSet<usize> {
    let deps = dep_indexes(nb);
    let mut seen: HashSet<usize> = HashSet::new();
    let mut stack: Vec<usize> = roots.to_vec();
    while let Some(v) = stack.pop() {
        if seen.insert(v) {
            stack.extend(deps[v].iter().copied());
        }
    }
    seen
}

/// Transitive dependencies of one cell, excluding the cell itself, ordered
/// deterministically: by topological position when the graph is acyclic,
/// by file position otherwise.
pub fn transitive_deps_ordered(nb: &Notebook, cell: usize) -> Vec<usize> {
    let closure = transitive_closure(nb, &[cell]);
    let base: Vec<usize> = match topo_order(nb) {
        Ok(order) => order,
        Err(_) => (0..nb.cells.len()).collect(),
    };
    base.into_iter()
        .filter(|i| *i != cell && closure.contains(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_text;

    fn nb(cells: &str) -> Notebook {
        let src = format!("%WOOFNB 1.0\nname: t\nlanguage: python\n{}", cells);
        parse_text(&src, None).unwrap()
    }

    fn ids(nb: &Notebook, order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| nb.cells[i].id.clone()).collect()
    }

    #[test]
    fn test_topo_linear_chain() {
        let nb = nb("```cell id=c type=code deps=b\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=a type=code\n```\n");
        let order = topo_order(&nb).unwrap();
        assert_eq!(ids(&nb, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_file_order_tie_break() {
        let nb = nb("```cell id=a type=code\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=c type=code deps=a\n```\n");
        let order = topo_order(&nb).unwrap();
        assert_eq!(ids(&nb, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_topo_priority_beats_file_order() {
        let nb = nb("```cell id=a type=code\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=c type=code deps=a priority=-1\n```\n");
        let order = topo_order(&nb).unwrap();
        assert_eq!(ids(&nb, &order), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_topo_diamond() {
        let nb = nb("```cell id=top type=code\n```\n\
```cell id=left type=code deps=top\n```\n\
```cell id=right type=code deps=top\n```\n\
```cell id=bottom type=code deps=left,right\n```\n");
        let order = topo_order(&nb).unwrap();
        assert_eq!(ids(&nb, &order), vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_cycle_names_exact_members() {
        let nb = nb("```cell id=a type=code deps=b\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=c type=code deps=a\n```\n");
        let members = topo_order(&nb).unwrap_err();
        // c is downstream of the cycle but not on it.
        assert_eq!(members, vec!["a", "b"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let nb = nb("```cell id=a type=code deps=a\n```\n");
        assert_eq!(topo_order(&nb).unwrap_err(), vec!["a"]);
    }

    #[test]
    fn test_unknown_deps_ignored_here() {
        let nb = nb("```cell id=a type=code deps=ghost\n```\n");
        let order = topo_order(&nb).unwrap();
        assert_eq!(order, vec![0]);
    }

    #[test]
    fn test_transitive_closure() {
        let nb = nb("```cell id=a type=code\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=c type=code deps=b\n```\n\
```cell id=d type=code\n```\n");
        let closure = transitive_closure(&nb, &[2]);
        let mut got: Vec<&str> = closure.iter().map(|&i| nb.cells[i].id.as_str()).collect();
        got.sort();
        assert_eq!(got, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_transitive_deps_ordered() {
        let nb = nb("```cell id=a type=code\n```\n\
```cell id=b type=code deps=a\n```\n\
```cell id=c type=code deps=b,a\n```\n");
        let deps = transitive_deps_ordered(&nb, 2);
        assert_eq!(ids(&nb, &deps), vec!["a", "b"]);
    }

    #[test]
    fn test_dep_indexes() {
        let nb = nb("```cell id=a type=code\n```\n\
```cell id=b type=code deps=a,ghost\n```\n");
        let deps = dep_indexes(&nb);
        assert_eq!(deps[0], Vec::<usize>::new());
        assert_eq!(deps[1], vec![0]);
    }
}
