//! Shared utilities: variable expansion, hashing and test doubles.

pub mod expand;
pub mod hash;

#[cfg(test)]
pub mod testutil;
