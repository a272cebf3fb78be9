#![allow(dead_code)]

pub mod crossfold_env;
pub mod datasets;
