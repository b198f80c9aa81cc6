//! Cleanup passes over LIR. Each pass takes one function and rewrites it in
//! place, keeping block predecessor sets consistent with the control flow.

pub mod pre_ssa;
