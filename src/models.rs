// src/models.rs

use bytes::BytesMut;
use chrono::NaiveDateTime;
use postgres_types::{FromSql, IsNull, ToSql, Type};
use serde::{Deserialize, Serialize};
use std::error::Error;

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Using newtype pattern for type safety to prevent mixing different ID types

/// Strongly typed identifier for a host-database row (city, neighborhood,
/// street or condo). Host ids are carried as opaque strings; the FK map
/// decides how they are cast at the SQL boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl ToSql for MemberId {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.0.to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.0.to_sql_checked(ty, out)
    }
}

impl<'a> FromSql<'a> for MemberId {
    fn from_sql(ty: &Type, raw: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let s = String::from_sql(ty, raw)?;
        Ok(MemberId(s))
    }

    fn accepts(ty: &Type) -> bool {
        <String as FromSql>::accepts(ty)
    }
}

/// Strongly typed identifier for DuplicateGroup records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl ToSql for GroupId {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.0.to_sql(ty, out)
    }

    fn accepts(ty: &Type) -> bool {
        <String as ToSql>::accepts(ty)
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.0.to_sql_checked(ty, out)
    }
}

impl<'a> FromSql<'a> for GroupId {
    fn from_sql(ty: &Type, raw: &[u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let s = String::from_sql(ty, raw)?;
        Ok(GroupId(s))
    }

    fn accepts(ty: &Type) -> bool {
        <String as FromSql>::accepts(ty)
    }
}

//------------------------------------------------------------------------------
// ENTITY KINDS
//------------------------------------------------------------------------------

/// The four host reference tables the pipeline deduplicates.
///
/// Kind order matters: detection runs City before Neighborhood before
/// Street before Condo so that parent-side canonical names exist before
/// child enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    City,
    Neighborhood,
    Street,
    Condo,
}

/// How a host table's primary key (and therefore every FK pointing at it)
/// is typed in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Uuid,
    Int,
}

impl EntityKind {
    /// All kinds in pipeline processing order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::City,
        EntityKind::Neighborhood,
        EntityKind::Street,
        EntityKind::Condo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::City => "city",
            Self::Neighborhood => "neighborhood",
            Self::Street => "street",
            Self::Condo => "condo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "city" => Some(Self::City),
            "neighborhood" => Some(Self::Neighborhood),
            "street" => Some(Self::Street),
            "condo" => Some(Self::Condo),
            _ => None,
        }
    }

    /// Host table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Cities carry integer registry-style ids; the rest of the hierarchy
    /// uses uuids.
    pub fn id_kind(&self) -> IdKind {
        match self {
            Self::City => IdKind::Int,
            _ => IdKind::Uuid,
        }
    }

    /// Whether the host table defines the `excluded` soft-delete flag.
    pub fn has_excluded_flag(&self) -> bool {
        !matches!(self, Self::City)
    }
}

//------------------------------------------------------------------------------
// GROUP LIFECYCLE
//------------------------------------------------------------------------------

/// Lifecycle of a duplicate group.
///
/// Valid transitions: Pending -> Executed | Discarded, Executed -> Reverted,
/// Reverted -> Executed. Everything else is rejected at the entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Pending,
    Executed,
    Discarded,
    Reverted,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Discarded => "discarded",
            Self::Reverted => "reverted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "executed" => Some(Self::Executed),
            "discarded" => Some(Self::Discarded),
            "reverted" => Some(Self::Reverted),
            _ => None,
        }
    }
}

/// How a group was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupSource {
    /// Trigram discovery only (LLM validation unavailable or failed).
    Trigram,
    /// Trigram discovery confirmed by the LLM validator.
    TrigramLlm,
}

impl GroupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigram => "trigram",
            Self::TrigramLlm => "trigram+llm",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trigram" => Some(Self::Trigram),
            "trigram+llm" => Some(Self::TrigramLlm),
            _ => None,
        }
    }
}

/// Origin of an authoritative canonical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanonicalSource {
    /// IBGE municipality registry.
    Registry,
    /// ViaCEP postal directory.
    PostalCep,
    /// Google geocoder.
    Geocoder,
    /// Google Places find-by-text.
    Places,
}

impl CanonicalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::PostalCep => "postal_cep",
            Self::Geocoder => "geocoder",
            Self::Places => "places",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "registry" => Some(Self::Registry),
            "postal_cep" => Some(Self::PostalCep),
            "geocoder" => Some(Self::Geocoder),
            "places" => Some(Self::Places),
            _ => None,
        }
    }
}

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// A similar-name pair emitted by the detector.
///
/// `parent_id` is the scope label: state code for cities, parent row id for
/// neighborhoods and streets, and the enclosing city id for condos.
#[derive(Debug, Clone)]
pub struct SimilarPair {
    pub id_a: MemberId,
    pub id_b: MemberId,
    pub name_a: String,
    pub name_b: String,
    pub parent_id: Option<String>,
    pub score: f64,
}

/// A candidate duplicate group produced by the clusterer, before LLM
/// validation and persistence.
#[derive(Debug, Clone)]
pub struct CandidateGroup {
    pub entity_kind: EntityKind,
    pub parent_id: Option<String>,
    pub normalized_name: String,
    /// Members in discovery order.
    pub member_ids: Vec<MemberId>,
    /// Original spellings, parallel to `member_ids`.
    pub member_names: Vec<String>,
    /// Mean of edge scores inside the component, rounded to 2 decimals.
    pub mean_score: f64,
}

/// A persisted duplicate group.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub entity_kind: EntityKind,
    pub parent_id: Option<String>,
    pub normalized_name: String,
    pub member_ids: Vec<MemberId>,
    pub member_names: Vec<String>,
    pub mean_score: f64,
    pub source: GroupSource,
    /// Full validator response, kept verbatim for audit. Opaque to the
    /// pipeline.
    pub llm_details: Option<serde_json::Value>,
    pub canonical_name: Option<String>,
    pub canonical_source: Option<CanonicalSource>,
    /// Full address text from the geocoder, when that resolver won.
    pub canonical_address: Option<String>,
    pub suggested_canonical_id: Option<MemberId>,
    pub status: GroupStatus,
    pub chosen_canonical_id: Option<MemberId>,
    pub chosen_name: Option<String>,
    pub executed_at: Option<NaiveDateTime>,
    pub executed_by: Option<String>,
    pub reverted_at: Option<NaiveDateTime>,
    /// Operator-supplied audit blob, preserved verbatim.
    pub decision_context: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub total_fks_redirected: Option<i64>,
}

/// Hierarchy context resolved from the host schema for one group member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberContext {
    pub member_id: String,
    pub member_name: String,
    pub state_code: Option<String>,
    pub city_id: Option<String>,
    pub city_name: Option<String>,
    pub neighborhood_id: Option<String>,
    pub neighborhood_name: Option<String>,
    pub street_id: Option<String>,
    pub street_name: Option<String>,
    /// Postal codes associated with the member, capped at the configured K.
    pub postal_codes: Vec<String>,
    /// Number of direct descendants (neighborhoods under a city, streets
    /// under a neighborhood, condos under a street).
    pub child_count: i64,
}

/// One row-level FK rewrite recorded during a merge. Granularity is
/// per-row so that reversal restores the exact prior graph.
#[derive(Debug, Clone)]
pub struct MergeLogEntry {
    pub id: String,
    pub group_id: GroupId,
    pub absorbed_member_id: MemberId,
    pub table_name: String,
    pub column_name: String,
    pub affected_row_pk: String,
    pub old_value: String,
    pub new_value: String,
    pub reverted: bool,
    pub reverted_at: Option<NaiveDateTime>,
    pub executed_at: NaiveDateTime,
}

/// Status of one detection pass over a single entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Started,
    Completed,
    Errored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

/// The validator's per-group decision, parsed from the batch response.
///
/// `valid_member_ids` may be a strict subset of the group's members; that
/// encodes partial rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDecision {
    pub confirmed: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub canonical_name: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub valid_member_ids: Vec<String>,
}

/// Outcome of the authoritative-name cascade for one group.
#[derive(Debug, Clone)]
pub struct CanonicalResolution {
    pub name: String,
    pub source: CanonicalSource,
    pub score: f64,
    /// Full address text, populated by geocoder-backed resolutions.
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::from_str("avenue"), None);
    }

    #[test]
    fn kind_order_is_parents_first() {
        assert_eq!(
            EntityKind::ALL,
            [
                EntityKind::City,
                EntityKind::Neighborhood,
                EntityKind::Street,
                EntityKind::Condo
            ]
        );
    }

    #[test]
    fn only_city_lacks_excluded_flag() {
        assert!(!EntityKind::City.has_excluded_flag());
        assert!(EntityKind::Neighborhood.has_excluded_flag());
        assert!(EntityKind::Street.has_excluded_flag());
        assert!(EntityKind::Condo.has_excluded_flag());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            GroupStatus::Pending,
            GroupStatus::Executed,
            GroupStatus::Discarded,
            GroupStatus::Reverted,
        ] {
            assert_eq!(GroupStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn source_labels_match_wire_format() {
        assert_eq!(GroupSource::Trigram.as_str(), "trigram");
        assert_eq!(GroupSource::TrigramLlm.as_str(), "trigram+llm");
        assert_eq!(GroupSource::from_str("trigram+llm"), Some(GroupSource::TrigramLlm));
    }
}
