use std::collections::BTreeSet;
use std::fmt;

/// Kind of unknown solved for.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum VariableType {
    /// Bus voltage magnitude (p.u.).
    BusV,
    /// Bus voltage angle (radians).
    BusPhi,
    /// Side 1 ratio of a transformer with a tap changer.
    BranchRho1,
    /// Susceptance of a shunt with switchable sections (p.u.).
    ShuntB,
}

/// Variable identifies an unknown scalar by element number and kind.
///
/// Ordering is by `(num, kind)` which fixes the column order of the
/// Jacobian.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub struct Variable {
    pub num: usize,
    pub kind: VariableType,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.num)
    }
}

/// Registry of the variables created for one solve session.
#[derive(Default, Debug)]
pub struct VariableSet {
    variables: BTreeSet<Variable>,
}

impl VariableSet {
    /// Gets or creates the variable with the given identity.
    pub fn variable(&mut self, num: usize, kind: VariableType) -> Variable {
        let variable = Variable { num, kind };
        self.variables.insert(variable);
        variable
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.variables.contains(variable)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}
