//! Remote queries: OData filter construction and the model query builder.

pub mod builder;
pub mod filter;
pub mod paginator;

pub use builder::QueryBuilder;
pub use filter::{
    Boolean, Constraint, FilterValue, Operator, Where, and_filters, build_filter, validate_field,
};
pub use paginator::Paginator;
