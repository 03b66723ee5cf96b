//! Plan generation: the ordered cell sequence a run will execute.
//!
//! Linear notebooks execute in file order; graph notebooks in topological
//! order with the resolver's tie-breaking. Non-executable cell types and
//! disabled cells are excluded from the output but still participate in
//! dependency resolution.

use super::model::{CellType, ExecOrder, Notebook};
use super::resolver;
use std::collections::HashSet;

/// Inputs beyond the notebook itself: an optional id selection, dependency
/// expansion, and the `test`-cells-only restriction.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub select: Vec<String>,
    pub no_deps: bool,
    pub tests_only: bool,
}

/// Produce the execution sequence as cell indexes into `nb.cells`.
pub fn plan(nb: &Notebook, opts: &PlanOptions) -> Result<Vec<usize>, String> {
    let base: Vec<usize> = match nb.header.execution.order {
        ExecOrder::Linear => (0..nb.cells.len()).collect(),
        ExecOrder::Graph => resolver::topo_order(nb)
            .map_err(|members| format!("dependency cycle involving: {}", members.join(", ")))?,
    };

    // Selection roots: explicit ids, or every test cell in tests mode.
    let mut roots: Vec<usize> = Vec::new();
    let restrict = opts.tests_only || !opts.select.is_empty();
    if opts.tests_only {
        roots.extend(
            nb.cells
                .iter()
                .enumerate()
                .filter(|(_, c)| c.cell_type == CellType::Test)
                .map(|(i, _)| i),
        );
    }
    if !opts.select.is_empty() {
        let by_id = nb.index_by_id();
        for id in &opts.select {
            let idx = by_id
                .get(id.as_str())
                .copied()
                .ok_or_else(|| format!("unknown cell id '{}'", id))?;
            roots.push(idx);
        }
    }

    let selected: Option<HashSet<usize>> = if restrict {
        if opts.no_deps {
            Some(roots.iter().copied().collect())
        } else {
            Some(resolver::transitive_closure(nb, &roots))
        }
    } else {
        None
    };

    Ok(base
        .into_iter()
        .filter(|&i| {
            let c = &nb.cells[i];
            c.cell_type.is_executable()
                && !c.is_disabled()
                && selected.as_ref().map_or(true, |s| s.contains(&i))
        })
        .collect())
}
