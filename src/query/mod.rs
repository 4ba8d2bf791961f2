//! # Query Module
//!
//! Declarative filter/sort/pagination specs and their canonical rendering
//! into backend requests. Two specs describing the same query always render
//! identically, which is what makes cache keys and deduplication keys line
//! up across call sites.

pub mod spec;

pub use spec::{Filter, FilterOp, Operation, Page, QuerySpec, Sort};
