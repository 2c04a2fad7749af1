//! Example domain
//!
//! `Member`/`Team` is the model the query engine is exercised against: a
//! member optionally belongs to one team, a team has many members.

pub mod member_team;

pub use member_team::{registry, seed, MemberRepository};
