use crate::equation::{Equation, EquationId, EquationType};
use crate::initializer::VoltageInitializer;
use crate::network::Network;
use crate::term::{EquationTerm, StateView};
use crate::variable::{Variable, VariableSet, VariableType};

use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Terms of one equation depending on a given variable.
#[derive(Debug, Clone)]
pub struct EquationTerms {
    pub equation: EquationId,
    pub(crate) slot: usize,
    pub(crate) terms: Vec<usize>,
}

/// One structural Jacobian contribution: the derivative of a term with
/// respect to a variable, placed at `(row, column)`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct JacobianCell {
    pub row: usize,
    pub column: usize,
    pub slot: usize,
    pub term: usize,
    pub variable: Variable,
}

#[derive(Default)]
struct Index {
    /// Active equations sorted by identity, position is the row.
    equations: Vec<EquationId>,
    /// Column of each variable referenced by an active equation.
    columns: BTreeMap<Variable, usize>,
    variables: BTreeMap<Variable, Vec<EquationTerms>>,
}

/// Owns the equations and variables of a solve session and indexes the
/// active ones into Jacobian rows and columns.
///
/// The index is rebuilt lazily, once per invalidation, by the accessors
/// that read it. Equation creation, activation and deactivation invalidate
/// it, and so does adding a term to an existing equation.
#[derive(Default)]
pub struct EquationSystem {
    variable_set: VariableSet,
    equations: Vec<Equation>,
    slots: BTreeMap<EquationId, usize>,
    index: Index,
    dirty: bool,
    structure_version: u64,
}

impl EquationSystem {
    pub fn new() -> Self {
        Self {
            dirty: true,
            ..Default::default()
        }
    }

    /// Gets or creates a variable.
    pub fn variable(&mut self, num: usize, kind: VariableType) -> Variable {
        self.variable_set.variable(num, kind)
    }

    pub fn variable_set(&self) -> &VariableSet {
        &self.variable_set
    }

    /// Gets or creates an equation. New equations are active.
    pub fn create_equation(&mut self, num: usize, kind: EquationType) -> EquationId {
        let id = EquationId { num, kind };
        if !self.slots.contains_key(&id) {
            self.slots.insert(id, self.equations.len());
            self.equations.push(Equation::new(id));
            log::trace!("equation {} created", id);
            self.invalidate();
        }
        id
    }

    pub fn equation(&self, id: EquationId) -> Option<&Equation> {
        self.slots.get(&id).map(|&slot| &self.equations[slot])
    }

    /// All equations, active or not, in identity order.
    pub fn equations(&self) -> impl Iterator<Item = &Equation> {
        self.slots.values().map(move |&slot| &self.equations[slot])
    }

    fn slot(&self, id: EquationId) -> usize {
        match self.slots.get(&id) {
            Some(&slot) => slot,
            None => panic!("equation {} does not exist", id),
        }
    }

    /// Appends a term to an equation. Terms are summed in insertion order.
    ///
    /// The term variables must come from this system's registry.
    pub fn add_term(&mut self, id: EquationId, term: Box<dyn EquationTerm>) {
        for v in term.variables() {
            assert!(
                self.variable_set.contains(v),
                "variable {} of {} term was not created by this equation system",
                v,
                term.name()
            );
        }
        let slot = self.slot(id);
        self.equations[slot].terms.push(term);
        if !self.dirty {
            log::debug!("term added to indexed equation {}, index invalidated", id);
        }
        self.invalidate();
    }

    pub fn set_active(&mut self, id: EquationId, active: bool) {
        let slot = self.slot(id);
        let equation = &mut self.equations[slot];
        if equation.is_active() != active {
            equation.set_active(active);
            log::trace!(
                "equation {} {}",
                id,
                if active { "activated" } else { "deactivated" }
            );
            self.invalidate();
        }
    }

    pub fn is_active(&self, id: EquationId) -> bool {
        self.equation(id).map_or(false, |eq| eq.is_active())
    }

    fn invalidate(&mut self) {
        self.dirty = true;
        self.structure_version += 1;
    }

    /// Incremented on every structural change.
    pub fn structure_version(&self) -> u64 {
        self.structure_version
    }

    fn ensure_index(&mut self) {
        if !self.dirty {
            return;
        }
        let mut index = Index::default();

        for equation in self.equations.iter_mut() {
            equation.row = None;
        }
        for (&id, &slot) in self.slots.iter() {
            let equation = &mut self.equations[slot];
            if !equation.is_active() {
                continue;
            }
            equation.row = Some(index.equations.len());
            index.equations.push(id);

            for (t, term) in equation.terms.iter().enumerate() {
                for &v in term.variables() {
                    let entries = index.variables.entry(v).or_default();
                    match entries.last_mut() {
                        Some(last) if last.slot == slot => {
                            if !last.terms.contains(&t) {
                                last.terms.push(t);
                            }
                        }
                        _ => entries.push(EquationTerms {
                            equation: id,
                            slot,
                            terms: vec![t],
                        }),
                    }
                }
            }
        }
        for (column, v) in index.variables.keys().enumerate() {
            index.columns.insert(*v, column);
        }
        log::debug!(
            "equation system indexed: {} equations, {} variables",
            index.equations.len(),
            index.columns.len()
        );

        self.index = index;
        self.dirty = false;
    }

    /// Active equations in identity order. The position of an equation is
    /// its row.
    pub fn sorted_equations_to_solve(&mut self) -> &[EquationId] {
        self.ensure_index();
        &self.index.equations
    }

    /// Variables referenced by active equations, in identity order, with
    /// the equation terms depending on each of them. The position of a
    /// variable is its column.
    pub fn sorted_variables_to_find(&mut self) -> &BTreeMap<Variable, Vec<EquationTerms>> {
        self.ensure_index();
        &self.index.variables
    }

    pub fn row(&mut self, id: EquationId) -> Option<usize> {
        self.ensure_index();
        self.equation(id).and_then(|eq| eq.row)
    }

    pub fn column(&mut self, variable: Variable) -> Option<usize> {
        self.ensure_index();
        self.index.columns.get(&variable).copied()
    }

    pub(crate) fn jacobian_cells(&mut self) -> Vec<JacobianCell> {
        self.ensure_index();
        let mut cells = Vec::new();
        for (v, entries) in self.index.variables.iter() {
            let column = self.index.columns[v];
            for entry in entries {
                let row = self.equations[entry.slot]
                    .row
                    .expect("indexed equation has a row");
                for &term in &entry.terms {
                    cells.push(JacobianCell {
                        row,
                        column,
                        slot: entry.slot,
                        term,
                        variable: *v,
                    });
                }
            }
        }
        cells
    }

    pub(crate) fn term_der(&self, slot: usize, term: usize, variable: Variable) -> f64 {
        self.equations[slot].terms[term].der(variable)
    }

    /// Builds the initial state vector, each variable taking its value from
    /// the initializer or from the network.
    pub fn create_state_vector(
        &mut self,
        network: &Network,
        initializer: &dyn VoltageInitializer,
    ) -> Result<Vec<f64>> {
        self.ensure_index();
        let mut x = vec![0.0; self.index.columns.len()];
        for (v, &column) in self.index.columns.iter() {
            x[column] = match v.kind {
                VariableType::BusV => initializer.magnitude(network.bus(v.num)?),
                VariableType::BusPhi => initializer.angle(network.bus(v.num)?),
                VariableType::BranchRho1 => network.branch(v.num)?.r1,
                VariableType::ShuntB => network.shunt(v.num)?.b,
            };
        }
        Ok(x)
    }

    /// Network quantity targeted by an equation, before right hand side
    /// correction.
    pub fn target(&self, id: EquationId, network: &Network) -> Result<f64> {
        let target = match id.kind {
            EquationType::BusP => {
                network.generation_target_p(id.num) - network.bus(id.num)?.load_target_p
            }
            EquationType::BusQ => {
                network.generation_target_q(id.num) - network.bus(id.num)?.load_target_q
            }
            EquationType::BusV => {
                network.bus(id.num)?;
                match network.target_v(id.num) {
                    Some(v) => v,
                    None => bail!("bus {} has no voltage target", id.num),
                }
            }
            EquationType::BusPhi => {
                network.bus(id.num)?;
                0.0
            }
            EquationType::BranchRho1 => network.branch(id.num)?.r1,
            EquationType::ShuntB => network.shunt(id.num)?.b,
        };
        Ok(target)
    }

    /// One target per active equation, less the equation right hand side.
    pub fn create_target_vector(&mut self, network: &Network) -> Result<Vec<f64>> {
        self.ensure_index();
        let mut targets = Vec::with_capacity(self.index.equations.len());
        for &id in &self.index.equations {
            let rhs = self.equations[self.slots[&id]].rhs();
            targets.push(self.target(id, network)? - rhs);
        }
        Ok(targets)
    }

    /// Pushes the state vector into every term. Terms of inactive equations
    /// are updated when all their variables have a column, so that they can
    /// still be evaluated.
    pub fn update_equations(&mut self, x: &[f64]) {
        self.ensure_index();
        assert_eq!(
            x.len(),
            self.index.columns.len(),
            "state vector length does not match the variable count"
        );
        let state = StateView::new(&self.index.columns, x);
        for equation in self.equations.iter_mut() {
            let evaluable = equation.is_active()
                || equation
                    .terms
                    .iter()
                    .all(|t| t.variables().iter().all(|v| state.contains(v)));
            if evaluable {
                for term in equation.terms.iter_mut() {
                    term.update(&state);
                }
            }
        }
    }

    /// Evaluates an equation, active or not, at the last updated state.
    /// Returns `None` if some of its variables are not part of the state.
    pub fn evaluate(&mut self, id: EquationId) -> Option<f64> {
        self.ensure_index();
        let equation = self.equation(id)?;
        let evaluable = equation.terms.iter().all(|t| {
            t.variables()
                .iter()
                .all(|v| self.index.columns.contains_key(v))
        });
        if evaluable {
            Some(equation.eval())
        } else {
            None
        }
    }

    pub fn create_equation_vector(&mut self) -> Vec<f64> {
        self.ensure_index();
        let mut fx = vec![0.0; self.index.equations.len()];
        self.update_equation_vector(&mut fx);
        fx
    }

    /// Evaluates every active equation into `fx`, indexed by row.
    pub fn update_equation_vector(&mut self, fx: &mut [f64]) {
        self.ensure_index();
        assert_eq!(
            fx.len(),
            self.index.equations.len(),
            "equation vector length does not match the equation count"
        );
        for (row, id) in self.index.equations.iter().enumerate() {
            fx[row] = self.equations[self.slots[id]].eval();
        }
    }

    /// Writes the state vector back into the network.
    pub fn update_network(&mut self, x: &[f64], network: &mut Network) -> Result<()> {
        self.ensure_index();
        assert_eq!(x.len(), self.index.columns.len());
        for (v, &column) in self.index.columns.iter() {
            let value = x[column];
            match v.kind {
                VariableType::BusV => network.bus_mut(v.num)?.v = value,
                VariableType::BusPhi => network.bus_mut(v.num)?.angle = value,
                VariableType::BranchRho1 => match network.branches.get_mut(v.num) {
                    Some(br) => br.r1 = value,
                    None => bail!("unknown branch {}", v.num),
                },
                VariableType::ShuntB => match network.shunts.get_mut(v.num) {
                    Some(sh) => sh.b = value,
                    None => bail!("unknown shunt {}", v.num),
                },
            }
        }
        Ok(())
    }
}
