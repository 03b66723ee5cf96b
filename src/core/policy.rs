//! Capability gating: header allow-list × per-cell declared intent.
//!
//! A cell holds a capability only when the header flag is true AND the cell
//! declares intent for it. `shell` implies `fs`; `isolated` is orthogonal
//! and always permitted; `none` grants nothing.

use super::model::{Cell, CellType, IoPolicy, SideFx};

/// Capabilities granted to one cell for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub fs: bool,
    pub net: bool,
    pub shell: bool,
}

/// Compute the capability set for a cell. Bash cells count as declaring
/// shell intent even without an explicit `sidefx=shell`.
pub fn capabilities(policy: &IoPolicy, cell: &Cell) -> Capabilities {
    let mut caps = Capabilities::default();
    let wants_shell = cell.sidefx() == SideFx::Shell || cell.cell_type == CellType::Bash;

    if wants_shell && policy.allow_shell {
        caps.shell = true;
        caps.fs = true;
    }
    match cell.sidefx() {
        SideFx::Fs if policy.allow_files => caps.fs = true,
        SideFx::Net if policy.allow_network => caps.net = true,
        _ => {}
    }
    caps
}

/// Whether a cell may run at all. Only bash cells hard-require a capability;
/// everything else fails closed inside the backend.
pub fn permits_execution(policy: &IoPolicy, cell: &Cell) -> bool {
    cell.cell_type != CellType::Bash || capabilities(policy, cell).shell
}
