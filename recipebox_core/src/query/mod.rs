//! Generic per-entity query verbs shared by every service.

mod aggregate;
mod crud;
mod find;

pub use aggregate::{Aggregate, AggregateFn, AggregateResult, GroupBy, GroupRow};
pub use crud::{crud, primary_key_condition, Crud};
pub use find::{contains_pattern, FindMany};
