// src/lib.rs
pub mod cache;
pub mod config;
pub mod db;
pub mod detection;
pub mod enrich;
pub mod fk_map;
pub mod impact;
pub mod llm;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod resolvers;
pub mod results;
pub mod similarity;

// Re-export common types for easier access
pub use models::{
    CandidateGroup, CanonicalSource, DuplicateGroup, EntityKind, GroupId, GroupSource,
    GroupStatus, MemberContext, MemberId, RunStatus, SimilarPair,
};

// Re-export important functionality
pub use db::PgPool;
pub use pipeline::AppContext;
