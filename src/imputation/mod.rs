pub mod engine;
pub mod li_stephens;
pub mod phase_states;
pub mod steps;
