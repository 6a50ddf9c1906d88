//! Built-in correlators
//!
//! - [`NoOpCorrelator`] - never finds an owner
//! - [`FilterCorrelator`] - owner search by attribute equality
//! - [`CompositeCorrelator`] - combines members by a [`CombinationPolicy`]
//! - [`IdMatchCorrelator`] - external match service plus a follow-on correlator

mod composite;
mod filter;
mod id_match;
mod noop;

pub use composite::{CombinationPolicy, CompositeCorrelator};
pub use filter::{CorrelationSource, FilterCorrelator, ItemCorrelation};
pub use id_match::{IdMatchCorrelator, IdMatchSettings};
pub use noop::NoOpCorrelator;
