//! FHIR R4 resource model
//!
//! Every resource, data type and backbone element is one generic [`Element`] shaped by a
//! [`TypeSchema`]. Schemas live in a [`SchemaRegistry`]; a process-wide registry is
//! installed once at startup (or lazily loaded from the embedded R4 definitions).
//!
//! # Module Organization
//!
//! - `schema`: type schemas, the embedded definitions format and StructureDefinition loading
//! - `registry`: name to schema lookup and the process-wide registry
//! - `element`: the generic node and its field storage rules
//! - `factory`: polymorphic construction from JSON
//! - `serialize` / `prune`: public and internal JSON output
//! - `traversal`: async reference rewriting
//!
//! # Example
//!
//! ```rust
//! use lumen_models::ResourceFactory;
//! use serde_json::json;
//!
//! let response = ResourceFactory::global()
//!     .create(
//!         json!({
//!             "resourceType": "AppointmentResponse",
//!             "id": "1",
//!             "appointment": {"reference": "Appointment/99"},
//!             "participantStatus": "accepted",
//!             "comment": null
//!         }),
//!         None,
//!     )
//!     .unwrap();
//!
//! assert_eq!(response.resource_type(), Some("AppointmentResponse"));
//! assert!(response.to_json().get("comment").is_none());
//! ```

pub mod element;
pub mod error;
pub mod factory;
pub mod prune;
pub mod registry;
pub mod schema;
pub mod serialize;
pub mod traversal;

pub use element::{ChoiceValue, Element, FieldValue, InternalFields, Item};
pub use error::{Error, Result};
pub use factory::{Input, ResourceFactory};
pub use prune::remove_null;
pub use registry::SchemaRegistry;
pub use schema::{Cardinality, FieldSchema, FieldType, TypeKind, TypeSchema};
pub use serialize::Visibility;
pub use traversal::{ReferenceUpdater, TraversalOptions};
