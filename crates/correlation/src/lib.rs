//! Identity correlation for govrun
//!
//! Decides whether an incoming identity record (a *subject*, usually a
//! resource object shadow) belongs to a known owner.
//!
//! # Features
//!
//! - **Correlators**: one [`Correlator`] trait with filter, composite, no-op
//!   and external ID match implementations
//! - **Registry**: [`CorrelatorRegistry`] resolves [`CorrelatorConfiguration`]
//!   values to instances, including custom kinds via [`CorrelatorFactory`]
//! - **Cases**: uncertain results open one case per subject in a
//!   [`CaseManager`]; definite results close it
//! - **Activity kind**: [`CorrelationHandler`] plugs correlation into the
//!   govrun activity framework as the `correlation` kind
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use govrun_activity::persistence::Record;
//! use govrun_activity::InMemoryObjectStore;
//! use govrun_correlation::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let owners = Arc::new(InMemoryObjectStore::with_records([
//!     Record::new("user", "u1").with_attribute("email", "ann@example.com"),
//! ]));
//! let correlator = FilterCorrelator::new(
//!     "by-email",
//!     vec![ItemCorrelation::attribute("mail", "email")],
//!     owners,
//! )
//! .unwrap();
//! let service = CorrelationService::new(Arc::new(correlator), Arc::new(InMemoryCaseManager::new()));
//!
//! let subject = Subject::new("s1").with_attribute("mail", "ann@example.com");
//! let result = service
//!     .correlate(&subject, &CorrelationContext::new("user"), &mut CorrelationState::default())
//!     .await
//!     .unwrap();
//! assert_eq!(result.owner().unwrap().id, "u1");
//! # });
//! ```

pub mod activity;
pub mod case;
pub mod correlator;
pub mod correlators;
pub mod error;
pub mod match_service;
pub mod model;
pub mod processor;
pub mod registry;
pub mod service;
pub mod source;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{CorrelationHandler, CorrelationInput, CorrelationWork, CORRELATION_KIND};
    pub use crate::case::{CaseManager, CaseState, CorrelationCase, InMemoryCaseManager};
    pub use crate::correlator::Correlator;
    pub use crate::correlators::{
        CombinationPolicy, CompositeCorrelator, CorrelationSource, FilterCorrelator,
        IdMatchCorrelator, IdMatchSettings, ItemCorrelation, NoOpCorrelator,
    };
    pub use crate::error::CorrelationError;
    pub use crate::match_service::{
        HttpMatchService, MatchRequest, MatchResponse, MatchService, MatchServiceConfig,
        PotentialMatch,
    };
    pub use crate::model::{
        CaseDecision, Candidate, CandidateSet, CorrelationContext, CorrelationResult,
        CorrelationSituation, CorrelationState, OwnerRef, Subject,
    };
    pub use crate::processor::{CorrelationProcessor, MappingStrength};
    pub use crate::registry::{CorrelatorConfiguration, CorrelatorFactory, CorrelatorRegistry};
    pub use crate::service::CorrelationService;
    pub use crate::source::{ChangeKind, ChangeRecord, ChangeSource, InMemoryChangeSource};
}

// Re-export key types at crate root
pub use activity::CorrelationHandler;
pub use case::{CaseManager, InMemoryCaseManager};
pub use correlator::Correlator;
pub use error::CorrelationError;
pub use match_service::{HttpMatchService, MatchService, MatchServiceConfig};
pub use model::{
    CaseDecision, Candidate, CandidateSet, CorrelationContext, CorrelationResult,
    CorrelationState, OwnerRef, Subject,
};
pub use registry::{CorrelatorConfiguration, CorrelatorRegistry};
pub use service::CorrelationService;
pub use source::{ChangeRecord, ChangeSource, InMemoryChangeSource};
