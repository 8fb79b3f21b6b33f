//! Collection of general utility functions and common traits.
//!
//! This module serves as a repository for small, reusable helpers that do not
//! belong to a single domain module: random code generation and JWT handling.

pub mod generate_random_string;
pub mod jwt;
