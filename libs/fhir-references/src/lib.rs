//! Reference handling for stored FHIR resources
//!
//! Builds on the reference traversal in `lumen-models`:
//!
//! - [`parser`]: reference strings with an optional `|authority` suffix
//! - [`global_id`]: UUIDv5 global ids on resources and every reference they hold
//! - [`authority`]: moving resources between source assigning authorities
//! - [`atomic`]: rewrites that either fully apply or leave the resource untouched

pub mod atomic;
pub mod authority;
pub mod error;
pub mod global_id;
pub mod parser;

pub use atomic::rewrite_atomically;
pub use authority::ChangeSourceAssigningAuthority;
pub use error::{Error, Result};
pub use global_id::{stamp_global_ids, GlobalIdConfig, GlobalIdStamper};
pub use parser::{create_reference, parse_reference, ReferenceParts};
