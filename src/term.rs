use crate::flows::BranchParameters;
use crate::variable::Variable;
use std::collections::BTreeMap;

/// Read access to the state vector through the variable columns of the
/// equation system.
pub struct StateView<'a> {
    columns: &'a BTreeMap<Variable, usize>,
    x: &'a [f64],
}

impl<'a> StateView<'a> {
    pub(crate) fn new(columns: &'a BTreeMap<Variable, usize>, x: &'a [f64]) -> Self {
        Self { columns, x }
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.columns.contains_key(variable)
    }

    /// Panics if the variable has no column.
    pub fn value(&self, variable: Variable) -> f64 {
        match self.columns.get(&variable) {
            Some(&column) => self.x[column],
            None => panic!("variable {} is not part of the state vector", variable),
        }
    }
}

/// A nonlinear function of a fixed list of variables.
///
/// `update` caches whatever the term needs from the state vector, `eval` and
/// `der` then work on that cached state.
pub trait EquationTerm {
    fn name(&self) -> &'static str;

    fn variables(&self) -> &[Variable];

    fn update(&mut self, state: &StateView<'_>);

    fn eval(&self) -> f64;

    /// Partial derivative at the last updated state. Panics for a variable
    /// the term does not depend on.
    fn der(&self, variable: Variable) -> f64;

    /// A term with a right hand side has a constant part that is moved to
    /// the target vector.
    fn has_rhs(&self) -> bool {
        false
    }

    /// Constant, state independent part of `eval`.
    fn rhs(&self) -> f64 {
        0.0
    }
}

fn unknown_variable(term: &dyn EquationTerm, variable: Variable) -> ! {
    panic!("{} has no derivative with respect to {}", term.name(), variable)
}

/// Identity term: the value of a single variable.
pub struct VariableTerm {
    variables: [Variable; 1],
    value: f64,
}

impl VariableTerm {
    pub fn new(variable: Variable) -> Self {
        Self {
            variables: [variable],
            value: f64::NAN,
        }
    }
}

impl EquationTerm for VariableTerm {
    fn name(&self) -> &'static str {
        "variable"
    }

    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn update(&mut self, state: &StateView<'_>) {
        self.value = state.value(self.variables[0]);
    }

    fn eval(&self) -> f64 {
        self.value
    }

    fn der(&self, variable: Variable) -> f64 {
        if variable == self.variables[0] {
            1.0
        } else {
            unknown_variable(self, variable)
        }
    }
}

/// Which branch terminal flow a [`ClosedBranchFlowTerm`] computes.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum BranchFlow {
    Side1Active,
    Side1Reactive,
    Side2Active,
    Side2Reactive,
}

/// Variables of a closed branch. The side 1 ratio is either a variable or
/// a fixed parameter.
#[derive(Debug, Copy, Clone)]
pub struct ClosedBranchVariables {
    pub v1: Variable,
    pub ph1: Variable,
    pub v2: Variable,
    pub ph2: Variable,
    pub r1: Option<Variable>,
}

#[derive(Default, Copy, Clone)]
struct BranchState {
    v1: f64,
    ph1: f64,
    v2: f64,
    ph2: f64,
    r1: f64,
}

/// Active or reactive power flowing into a closed branch at one of its
/// terminals.
pub struct ClosedBranchFlowTerm {
    flow: BranchFlow,
    params: BranchParameters,
    vars: ClosedBranchVariables,
    fixed_r1: f64,
    variables: Vec<Variable>,
    state: BranchState,
}

impl ClosedBranchFlowTerm {
    pub fn new(
        flow: BranchFlow,
        params: BranchParameters,
        vars: ClosedBranchVariables,
        fixed_r1: f64,
    ) -> Self {
        let mut variables = vec![vars.v1, vars.ph1, vars.v2, vars.ph2];
        if let Some(r1) = vars.r1 {
            variables.push(r1);
        }
        Self {
            flow,
            params,
            vars,
            fixed_r1,
            variables,
            state: BranchState::default(),
        }
    }

    pub fn flow(&self) -> BranchFlow {
        self.flow
    }

    /// Derivatives with respect to `(v1, ph1, v2, ph2, r1)`.
    fn derivatives(&self) -> [f64; 5] {
        let BranchParameters {
            y,
            ksi,
            g1,
            b1,
            g2,
            b2,
            ..
        } = self.params;
        let BranchState {
            v1,
            ph1,
            v2,
            ph2,
            r1,
        } = self.state;

        match self.flow {
            BranchFlow::Side1Active => {
                let (s, c) = self.params.theta1(ph1, ph2).sin_cos();
                let a = 2.0 * g1 * r1 * v1 + 2.0 * y * r1 * v1 * ksi.sin() - y * v2 * s;
                [
                    r1 * a,
                    y * r1 * v1 * v2 * c,
                    -y * r1 * v1 * s,
                    -y * r1 * v1 * v2 * c,
                    v1 * a,
                ]
            }
            BranchFlow::Side1Reactive => {
                let (s, c) = self.params.theta1(ph1, ph2).sin_cos();
                let a = -2.0 * b1 * r1 * v1 + 2.0 * y * r1 * v1 * ksi.cos() - y * v2 * c;
                [
                    r1 * a,
                    -y * r1 * v1 * v2 * s,
                    -y * r1 * v1 * c,
                    y * r1 * v1 * v2 * s,
                    v1 * a,
                ]
            }
            BranchFlow::Side2Active => {
                let (s, c) = self.params.theta2(ph1, ph2).sin_cos();
                [
                    -y * r1 * v2 * s,
                    -y * r1 * v1 * v2 * c,
                    2.0 * g2 * v2 - y * r1 * v1 * s + 2.0 * y * v2 * ksi.sin(),
                    y * r1 * v1 * v2 * c,
                    -y * v1 * v2 * s,
                ]
            }
            BranchFlow::Side2Reactive => {
                let (s, c) = self.params.theta2(ph1, ph2).sin_cos();
                [
                    -y * r1 * v2 * c,
                    y * r1 * v1 * v2 * s,
                    -2.0 * b2 * v2 - y * r1 * v1 * c + 2.0 * y * v2 * ksi.cos(),
                    -y * r1 * v1 * v2 * s,
                    -y * v1 * v2 * c,
                ]
            }
        }
    }
}

impl EquationTerm for ClosedBranchFlowTerm {
    fn name(&self) -> &'static str {
        match self.flow {
            BranchFlow::Side1Active => "closed branch side 1 active flow",
            BranchFlow::Side1Reactive => "closed branch side 1 reactive flow",
            BranchFlow::Side2Active => "closed branch side 2 active flow",
            BranchFlow::Side2Reactive => "closed branch side 2 reactive flow",
        }
    }

    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn update(&mut self, state: &StateView<'_>) {
        self.state = BranchState {
            v1: state.value(self.vars.v1),
            ph1: state.value(self.vars.ph1),
            v2: state.value(self.vars.v2),
            ph2: state.value(self.vars.ph2),
            r1: match self.vars.r1 {
                Some(r1) => state.value(r1),
                None => self.fixed_r1,
            },
        };
    }

    fn eval(&self) -> f64 {
        let BranchState {
            v1,
            ph1,
            v2,
            ph2,
            r1,
        } = self.state;
        match self.flow {
            BranchFlow::Side1Active => self.params.p1(v1, ph1, v2, ph2, r1),
            BranchFlow::Side1Reactive => self.params.q1(v1, ph1, v2, ph2, r1),
            BranchFlow::Side2Active => self.params.p2(v1, ph1, v2, ph2, r1),
            BranchFlow::Side2Reactive => self.params.q2(v1, ph1, v2, ph2, r1),
        }
    }

    fn der(&self, variable: Variable) -> f64 {
        let d = self.derivatives();
        if variable == self.vars.v1 {
            d[0]
        } else if variable == self.vars.ph1 {
            d[1]
        } else if variable == self.vars.v2 {
            d[2]
        } else if variable == self.vars.ph2 {
            d[3]
        } else if Some(variable) == self.vars.r1 {
            d[4]
        } else {
            unknown_variable(self, variable)
        }
    }
}

/// Susceptance of a shunt, fixed or solved for.
#[derive(Debug, Copy, Clone)]
pub enum ShuntSusceptance {
    Fixed(f64),
    Variable(Variable),
}

/// Power flowing out of a bus into a shunt admittance: `p = g v^2`,
/// `q = -b v^2`.
pub struct ShuntFlowTerm {
    reactive: bool,
    g: f64,
    b: ShuntSusceptance,
    v_var: Variable,
    variables: Vec<Variable>,
    v: f64,
    b_value: f64,
}

impl ShuntFlowTerm {
    pub fn active(v: Variable, g: f64) -> Self {
        Self {
            reactive: false,
            g,
            b: ShuntSusceptance::Fixed(0.0),
            v_var: v,
            variables: vec![v],
            v: f64::NAN,
            b_value: 0.0,
        }
    }

    pub fn reactive(v: Variable, b: ShuntSusceptance) -> Self {
        let mut variables = vec![v];
        if let ShuntSusceptance::Variable(b_var) = b {
            variables.push(b_var);
        }
        Self {
            reactive: true,
            g: 0.0,
            b,
            v_var: v,
            variables,
            v: f64::NAN,
            b_value: f64::NAN,
        }
    }
}

impl EquationTerm for ShuntFlowTerm {
    fn name(&self) -> &'static str {
        if self.reactive {
            "shunt reactive flow"
        } else {
            "shunt active flow"
        }
    }

    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn update(&mut self, state: &StateView<'_>) {
        self.v = state.value(self.v_var);
        self.b_value = match self.b {
            ShuntSusceptance::Fixed(b) => b,
            ShuntSusceptance::Variable(b) => state.value(b),
        };
    }

    fn eval(&self) -> f64 {
        if self.reactive {
            -self.b_value * self.v * self.v
        } else {
            self.g * self.v * self.v
        }
    }

    fn der(&self, variable: Variable) -> f64 {
        if variable == self.v_var {
            if self.reactive {
                -2.0 * self.b_value * self.v
            } else {
                2.0 * self.g * self.v
            }
        } else {
            match self.b {
                ShuntSusceptance::Variable(b) if self.reactive && variable == b => -self.v * self.v,
                _ => unknown_variable(self, variable),
            }
        }
    }
}
