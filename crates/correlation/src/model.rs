//! Correlation data model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use govrun_activity::persistence::Record;

use crate::error::CorrelationError;

/// Prefix of case outcomes that pick a candidate
pub const OPTION_PREFIX: &str = "option:";

/// Case outcome meaning none of the listed owners (a new identity)
pub const NONE_OUTCOME: &str = "none";

/// Prefix of outcomes picking a further new-identity suggestion (`none:1`, `none:2`, ...)
pub const NONE_PREFIX: &str = "none:";

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// An identity record being correlated (a resource object shadow)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).filter(|v| !v.is_null())
    }
}

impl From<&Record> for Subject {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            attributes: record.attributes.clone(),
        }
    }
}

/// Reference to an owner object (e.g. a user)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub object_type: String,
    pub id: String,
}

impl OwnerRef {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
        }
    }
}

/// One option offered to the human deciding a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Known owner this option stands for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,

    /// Identity reference id assigned by an external match service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default)]
    pub attributes: Map<String, Value>,

    /// The "none of the above" option: the subject is a new identity
    #[serde(default)]
    pub new_identity: bool,

    /// Position among the new-identity options of a set; 0 is plain "none"
    #[serde(default, skip_serializing_if = "is_zero")]
    pub suggestion: u32,
}

impl Candidate {
    /// Option pointing at a known owner
    pub fn owner(owner: OwnerRef) -> Self {
        Self {
            owner: Some(owner),
            reference_id: None,
            confidence: None,
            attributes: Map::new(),
            new_identity: false,
            suggestion: 0,
        }
    }

    /// Option pointing at an identity of the external match service
    pub fn reference(reference_id: impl Into<String>) -> Self {
        Self {
            owner: None,
            reference_id: Some(reference_id.into()),
            confidence: None,
            attributes: Map::new(),
            new_identity: false,
            suggestion: 0,
        }
    }

    pub fn none_of_the_above() -> Self {
        Self {
            owner: None,
            reference_id: None,
            confidence: None,
            attributes: Map::new(),
            new_identity: true,
            suggestion: 0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Whether choosing this option declares the subject a new identity
    pub fn is_new_identity(&self) -> bool {
        self.new_identity || (self.reference_id.is_none() && self.owner.is_none())
    }

    /// Case outcome that selects this option
    pub fn outcome(&self) -> String {
        if self.is_new_identity() {
            return CaseDecision::new_identity(self.suggestion).encode();
        }
        match (&self.reference_id, &self.owner) {
            (Some(reference_id), _) => format!("{OPTION_PREFIX}{reference_id}"),
            (None, Some(owner)) => format!("{OPTION_PREFIX}{}", owner.id),
            (None, None) => NONE_OUTCOME.to_string(),
        }
    }
}

/// Non-empty list of options of an uncertain correlation
///
/// Always contains at least one "none of the above" option. New-identity
/// suggestions with distinct attributes stay separate options, numbered
/// `none`, `none:1`, `none:2`, ...; identical ones are merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Build the set, adding a "none of the above" option when no candidate is one
    pub fn new(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        let mut set: Vec<Candidate> = Vec::new();
        let mut suggestions = 0;
        for mut candidate in candidates {
            if !candidate.is_new_identity() {
                set.push(candidate);
                continue;
            }
            let duplicate = set
                .iter()
                .any(|c| c.is_new_identity() && c.attributes == candidate.attributes);
            if duplicate {
                continue;
            }
            candidate.new_identity = true;
            candidate.suggestion = suggestions;
            suggestions += 1;
            set.push(candidate);
        }
        if suggestions == 0 {
            set.push(Candidate::none_of_the_above());
        }
        Self { candidates: set }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false: the set holds at least the none-of-the-above option
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidate selected by a case outcome
    pub fn find(&self, decision: &CaseDecision) -> Option<&Candidate> {
        let outcome = decision.encode();
        self.candidates.iter().find(|c| c.outcome() == outcome)
    }
}

/// Result of correlating one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CorrelationResult {
    /// No owner exists; a new one may be created
    NoOwner,
    ExistingOwner { owner: OwnerRef },
    /// A human has to decide; a case is opened for the subject
    Uncertain { candidates: CandidateSet },
}

impl CorrelationResult {
    pub fn existing(owner: OwnerRef) -> Self {
        Self::ExistingOwner { owner }
    }

    pub fn uncertain(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        Self::Uncertain {
            candidates: CandidateSet::new(candidates),
        }
    }

    pub fn owner(&self) -> Option<&OwnerRef> {
        match self {
            Self::ExistingOwner { owner } => Some(owner),
            _ => None,
        }
    }

    pub fn is_uncertain(&self) -> bool {
        matches!(self, Self::Uncertain { .. })
    }

    pub fn situation(&self) -> CorrelationSituation {
        match self {
            Self::NoOwner => CorrelationSituation::NoOwner,
            Self::ExistingOwner { .. } => CorrelationSituation::ExistingOwner,
            Self::Uncertain { .. } => CorrelationSituation::Uncertain,
        }
    }
}

/// Correlation situation persisted on the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationSituation {
    NoOwner,
    ExistingOwner,
    Uncertain,
}

impl CorrelationSituation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoOwner => "no_owner",
            Self::ExistingOwner => "existing_owner",
            Self::Uncertain => "uncertain",
        }
    }
}

/// Immutable inputs of one correlation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Type of the owner objects searched for (e.g. `user`)
    pub owner_type: String,
    /// Source resource of the subject
    #[serde(default)]
    pub resource: String,
    /// Object type of the subject on its resource (e.g. `account/default`)
    #[serde(default)]
    pub object_type: String,
    /// Snapshot of the system configuration
    #[serde(default)]
    pub system_configuration: Value,
}

impl CorrelationContext {
    pub fn new(owner_type: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = object_type.into();
        self
    }

    pub fn with_system_configuration(mut self, configuration: Value) -> Self {
        self.system_configuration = configuration;
        self
    }
}

/// Correlator resumption data persisted with the subject
///
/// A second pass over the same subject short-circuits to the known answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationState {
    /// Open match request of the external match service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_request_id: Option<String>,

    /// Identity reference id resolved by the external match service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,

    /// Encoded human decision that closed the subject's last case
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

impl CorrelationState {
    pub fn is_empty(&self) -> bool {
        self.match_request_id.is_none() && self.reference_id.is_none() && self.decision.is_none()
    }
}

/// Human decision on a correlation case
///
/// Encoded as `option:<id>` for a listed candidate, `none` for none of
/// the above, or `none:<n>` for a further new-identity suggestion.
///
/// # Example
///
/// ```
/// use govrun_correlation::CaseDecision;
///
/// let decision = CaseDecision::parse("option:ref-42").unwrap();
/// assert_eq!(decision, CaseDecision::Candidate("ref-42".to_string()));
/// assert_eq!(CaseDecision::parse("none").unwrap(), CaseDecision::NoneOfTheAbove);
/// assert_eq!(CaseDecision::parse("none:2").unwrap(), CaseDecision::NewIdentity(2));
/// assert!(CaseDecision::parse("maybe").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseDecision {
    Candidate(String),
    NoneOfTheAbove,
    /// A new identity described by the n-th further suggestion (n >= 1)
    NewIdentity(u32),
}

impl CaseDecision {
    /// New-identity decision for the suggestion at `index`
    pub fn new_identity(index: u32) -> Self {
        match index {
            0 => Self::NoneOfTheAbove,
            n => Self::NewIdentity(n),
        }
    }

    pub fn parse(outcome: &str) -> Result<Self, CorrelationError> {
        if outcome == NONE_OUTCOME {
            return Ok(Self::NoneOfTheAbove);
        }
        if let Some(index) = outcome.strip_prefix(NONE_PREFIX) {
            return match index.parse::<u32>() {
                Ok(n) if n > 0 => Ok(Self::NewIdentity(n)),
                _ => Err(CorrelationError::schema(format!(
                    "unsupported case outcome '{outcome}'"
                ))),
            };
        }
        match outcome.strip_prefix(OPTION_PREFIX) {
            Some(id) if !id.is_empty() => Ok(Self::Candidate(id.to_string())),
            _ => Err(CorrelationError::schema(format!(
                "unsupported case outcome '{outcome}'"
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Candidate(id) => format!("{OPTION_PREFIX}{id}"),
            Self::NoneOfTheAbove => NONE_OUTCOME.to_string(),
            Self::NewIdentity(n) => format!("{NONE_PREFIX}{n}"),
        }
    }

    /// Chosen id, `None` for a new identity
    pub fn chosen_id(&self) -> Option<&str> {
        match self {
            Self::Candidate(id) => Some(id),
            Self::NoneOfTheAbove | Self::NewIdentity(_) => None,
        }
    }
}
