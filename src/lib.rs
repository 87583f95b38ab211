mod ac_system;
mod equation;
mod equation_system;
mod flows;
mod initializer;
mod jacobian;
mod load_flow;
mod matrix;
mod network;
mod newton_raphson;
mod observer;
mod parameters;
mod stopping_criteria;
mod term;
mod variable;

pub mod cases;
pub mod debug;
pub mod math;
pub mod outer_loop;

pub use ac_system::*;
pub use equation::*;
pub use equation_system::*;
pub use flows::*;
pub use initializer::*;
pub use jacobian::*;
pub use load_flow::*;
pub use matrix::*;
pub use network::*;
pub use newton_raphson::*;
pub use observer::*;
pub use parameters::*;
pub use stopping_criteria::*;
pub use term::*;
pub use variable::*;

#[cfg(test)]
mod tests;
