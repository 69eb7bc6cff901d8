//! Integration and adversarial test suite for the Umbra core.
//!
//! These are black-box tests against the public API of `umbra-core`,
//! `umbra-plots`, `umbra-farm`, `umbra-consensus`, and `umbra-node-lib` —
//! they exercise the coupling between components (a real `Node`, real
//! plot files, a real farming index) rather than any single module in
//! isolation, which each crate's own `#[cfg(test)]` modules already cover.

pub mod helpers;
