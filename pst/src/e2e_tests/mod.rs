//! End-to-end tests at the store level.
//!
//! Each test file covers one scenario: a fixture file is written with the
//! builders in `crate::testing`, opened through [`crate::Pst`], and the
//! decoded output is checked against what was written.

#![cfg(test)]


mod test_determinism;
mod test_file_backed;
mod test_large_values;
mod test_property_cardinality;
mod test_sub_nodes;
mod test_tables;
