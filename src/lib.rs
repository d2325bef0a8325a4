#[macro_use]
extern crate log;

pub mod bref;
pub mod cli;
pub mod haplotype;
pub mod imputation;
pub mod model;
pub mod utils;
