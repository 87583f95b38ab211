use crate::term::EquationTerm;
use std::fmt;

/// Kind of equation.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum EquationType {
    /// Active power injected at a bus.
    BusP,
    /// Reactive power injected at a bus.
    BusQ,
    /// Bus voltage magnitude.
    BusV,
    /// Bus voltage angle.
    BusPhi,
    /// Transformer side 1 ratio.
    BranchRho1,
    /// Shunt susceptance.
    ShuntB,
}

/// Equation identity, ordered by `(num, kind)` which fixes the row order
/// of the Jacobian.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub struct EquationId {
    pub num: usize,
    pub kind: EquationType,
}

impl fmt::Display for EquationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.num)
    }
}

/// Equation is a sum of terms. Created and owned by the
/// [`EquationSystem`](crate::EquationSystem), never removed, only
/// deactivated.
pub struct Equation {
    id: EquationId,
    active: bool,
    pub(crate) row: Option<usize>,
    pub(crate) terms: Vec<Box<dyn EquationTerm>>,
}

impl Equation {
    pub(crate) fn new(id: EquationId) -> Self {
        Self {
            id,
            active: true,
            row: None,
            terms: Vec::new(),
        }
    }

    pub fn id(&self) -> EquationId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Row in the Jacobian, if active and indexed.
    pub fn row(&self) -> Option<usize> {
        self.row
    }

    pub fn terms(&self) -> &[Box<dyn EquationTerm>] {
        &self.terms
    }

    /// Sum of the term values, without their right hand side parts.
    pub fn eval(&self) -> f64 {
        self.terms
            .iter()
            .map(|t| if t.has_rhs() { t.eval() - t.rhs() } else { t.eval() })
            .sum()
    }

    /// Sum of the term right hand sides.
    pub fn rhs(&self) -> f64 {
        self.terms
            .iter()
            .filter(|t| t.has_rhs())
            .map(|t| t.rhs())
            .sum()
    }
}
