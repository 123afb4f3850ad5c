//! Schema registry
//!
//! Maps type names to their [`TypeSchema`]. One registry is installed process-wide at
//! startup and only read afterwards; the factory and the field setters resolve nested
//! types through it.

use phf::phf_set;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::schema::{package, structure_definition, DefinitionParser, TypeSchema};

/// Embedded R4 definitions in load order; later files inherit from the bases in earlier ones.
const BUILTIN_DEFINITIONS: &[(&str, &str)] = &[
    ("datatypes.schema", include_str!("schema/r4/datatypes.schema")),
    ("foundation.schema", include_str!("schema/r4/foundation.schema")),
    ("administration.schema", include_str!("schema/r4/administration.schema")),
    ("clinical.schema", include_str!("schema/r4/clinical.schema")),
    ("diagnostics.schema", include_str!("schema/r4/diagnostics.schema")),
    ("medications.schema", include_str!("schema/r4/medications.schema")),
    ("financial.schema", include_str!("schema/r4/financial.schema")),
    ("conformance.schema", include_str!("schema/r4/conformance.schema")),
    ("knowledge.schema", include_str!("schema/r4/knowledge.schema")),
    ("server.schema", include_str!("schema/r4/server.schema")),
];

static GLOBAL: OnceLock<SchemaRegistry> = OnceLock::new();

/// Every resource type defined by FHIR R4 (4.0.1).
static R4_RESOURCE_TYPES: phf::Set<&'static str> = phf_set! {
    "Account", "ActivityDefinition", "AdverseEvent", "AllergyIntolerance", "Appointment",
    "AppointmentResponse", "AuditEvent", "Basic", "Binary", "BiologicallyDerivedProduct",
    "BodyStructure", "Bundle", "CapabilityStatement", "CarePlan", "CareTeam", "CatalogEntry",
    "ChargeItem", "ChargeItemDefinition", "Claim", "ClaimResponse", "ClinicalImpression",
    "CodeSystem", "Communication", "CommunicationRequest", "CompartmentDefinition",
    "Composition", "ConceptMap", "Condition", "Consent", "Contract", "Coverage",
    "CoverageEligibilityRequest", "CoverageEligibilityResponse", "DetectedIssue", "Device",
    "DeviceDefinition", "DeviceMetric", "DeviceRequest", "DeviceUseStatement",
    "DiagnosticReport", "DocumentManifest", "DocumentReference", "EffectEvidenceSynthesis",
    "Encounter", "Endpoint", "EnrollmentRequest", "EnrollmentResponse", "EpisodeOfCare",
    "EventDefinition", "Evidence", "EvidenceVariable", "ExampleScenario",
    "ExplanationOfBenefit", "FamilyMemberHistory", "Flag", "Goal", "GraphDefinition", "Group",
    "GuidanceResponse", "HealthcareService", "ImagingStudy", "Immunization",
    "ImmunizationEvaluation", "ImmunizationRecommendation", "ImplementationGuide",
    "InsurancePlan", "Invoice", "Library", "Linkage", "List", "Location", "Measure",
    "MeasureReport", "Media", "Medication", "MedicationAdministration", "MedicationDispense",
    "MedicationKnowledge", "MedicationRequest", "MedicationStatement", "MedicinalProduct",
    "MedicinalProductAuthorization", "MedicinalProductContraindication",
    "MedicinalProductIndication", "MedicinalProductIngredient", "MedicinalProductInteraction",
    "MedicinalProductManufactured", "MedicinalProductPackaged",
    "MedicinalProductPharmaceutical", "MedicinalProductUndesirableEffect",
    "MessageDefinition", "MessageHeader", "MolecularSequence", "NamingSystem",
    "NutritionOrder", "Observation", "ObservationDefinition", "OperationDefinition",
    "OperationOutcome", "Organization", "OrganizationAffiliation", "Parameters", "Patient",
    "PaymentNotice", "PaymentReconciliation", "Person", "PlanDefinition", "Practitioner",
    "PractitionerRole", "Procedure", "Provenance", "Questionnaire", "QuestionnaireResponse",
    "RelatedPerson", "RequestGroup", "ResearchDefinition", "ResearchElementDefinition",
    "ResearchStudy", "ResearchSubject", "RiskAssessment", "RiskEvidenceSynthesis", "Schedule",
    "SearchParameter", "ServiceRequest", "Slot", "Specimen", "SpecimenDefinition",
    "StructureDefinition", "StructureMap", "Subscription", "Substance",
    "SubstanceNucleicAcid", "SubstancePolymer", "SubstanceProtein",
    "SubstanceReferenceInformation", "SubstanceSourceMaterial", "SubstanceSpecification",
    "SupplyDelivery", "SupplyRequest", "Task", "TerminologyCapabilities", "TestReport",
    "TestScript", "ValueSet", "VerificationResult", "VisionPrescription",
};

/// Returns true if `name` is a resource type defined by FHIR R4.
pub fn is_r4_resource_type(name: &str) -> bool {
    R4_RESOURCE_TYPES.contains(name)
}

/// All FHIR R4 resource type names, sorted.
pub fn r4_resource_types() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = R4_RESOURCE_TYPES.iter().copied().collect();
    names.sort_unstable();
    names
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, Arc<TypeSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the embedded R4 definitions.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        let mut parser = DefinitionParser::new();
        for (file, source) in BUILTIN_DEFINITIONS {
            let schemas = parser.parse(source).map_err(|err| match err {
                Error::SchemaDefinition { line, message } => Error::SchemaDefinition {
                    line,
                    message: format!("{file}: {message}"),
                },
                other => other,
            })?;
            registry.extend(schemas);
        }
        Ok(registry)
    }

    /// Add a schema, replacing any schema of the same name.
    pub fn register(&mut self, schema: TypeSchema) -> Option<Arc<TypeSchema>> {
        self.types
            .insert(schema.name().to_string(), Arc::new(schema))
    }

    pub fn extend<I>(&mut self, schemas: I)
    where
        I: IntoIterator<Item = TypeSchema>,
    {
        for schema in schemas {
            self.register(schema);
        }
    }

    /// Like [`extend`](Self::extend), but a replaced type keeps the internal keys of the
    /// schema it replaces, so `Attachment._file_id` survives loading the core package.
    pub fn extend_keeping_internal_keys<I>(&mut self, schemas: I)
    where
        I: IntoIterator<Item = TypeSchema>,
    {
        for schema in schemas {
            let schema = match self.get(schema.name()) {
                Some(existing) => {
                    let keys = existing.internal_keys().to_vec();
                    schema.with_internal_keys(keys)
                }
                None => schema,
            };
            self.register(schema);
        }
    }

    /// Register the types derived from StructureDefinitions found at `path`: a JSON file
    /// (StructureDefinition or Bundle), a directory of JSON files, or a package tarball.
    pub fn load_definitions(&mut self, path: &Path) -> Result<usize> {
        let resources = package::load_resources(path)?;
        let schemas = structure_definition::schemas_from_resources(&resources);
        let count = schemas.len();
        self.extend_keeping_internal_keys(schemas);
        tracing::info!(path = %path.display(), types = count, "Loaded type definitions");
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TypeSchema>> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&Arc<TypeSchema>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Like [`resolve`](Self::resolve), but the type must be a resource.
    pub fn resource(&self, resource_type: &str) -> Result<&Arc<TypeSchema>> {
        let schema = self.resolve(resource_type)?;
        if schema.is_resource() {
            Ok(schema)
        } else {
            Err(Error::NotAResource(resource_type.to_string()))
        }
    }

    /// Registered resource type names, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .types
            .values()
            .filter(|schema| schema.is_resource())
            .map(|schema| schema.name())
            .collect();
        names.sort_unstable();
        names
    }

    /// R4 resource types without a registered schema, sorted.
    pub fn missing_r4_resource_types(&self) -> Vec<&'static str> {
        r4_resource_types()
            .into_iter()
            .filter(|name| !self.contains(name))
            .collect()
    }

    /// Complex type names referenced by some field but not registered.
    pub fn dangling_types(&self) -> Vec<String> {
        let mut dangling = BTreeSet::new();
        for schema in self.types.values() {
            for field in schema.fields() {
                for target in field.field_type.complex_targets() {
                    if !self.contains(target) {
                        dangling.insert(target.to_string());
                    }
                }
            }
        }
        dangling.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Install the process-wide registry. Fails if one is already installed or in use.
pub fn install(registry: SchemaRegistry) -> Result<()> {
    let types = registry.len();
    GLOBAL
        .set(registry)
        .map_err(|_| Error::RegistryAlreadyInstalled)?;
    tracing::info!(types, "Installed schema registry");
    Ok(())
}

/// The process-wide registry; the built-in definitions unless another was installed first.
pub fn global() -> &'static SchemaRegistry {
    GLOBAL.get_or_init(|| {
        SchemaRegistry::builtin().expect("failed to load embedded R4 schema definitions")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, TypeKind};

    #[test]
    fn builtin_definitions_are_self_contained() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.dangling_types().is_empty(), "{:?}", registry.dangling_types());
        assert!(registry.len() > 600);
    }

    #[test]
    fn builtin_resources_are_r4_types_or_server_resources() {
        let registry = SchemaRegistry::builtin().unwrap();
        for name in registry.resource_types() {
            assert!(
                is_r4_resource_type(name) || name == "ExportStatus",
                "{name} is not an R4 resource"
            );
        }
        assert!(registry.resource_types().contains(&"AppointmentResponse"));
        assert!(registry.resource_types().contains(&"ExportStatus"));
    }

    #[test]
    fn builtin_registers_every_r4_resource() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(
            registry.missing_r4_resource_types().is_empty(),
            "{:?}",
            registry.missing_r4_resource_types()
        );
        assert_eq!(registry.resource_types().len(), r4_resource_types().len() + 1);
        assert_eq!(
            registry.resolve("EncounterHospitalization").unwrap().kind(),
            TypeKind::BackboneElement
        );
    }

    #[test]
    fn evidence_certainty_nests_through_subcomponent() {
        let registry = SchemaRegistry::builtin().unwrap();
        let certainty = registry.resolve("EvidenceCertainty").unwrap();
        assert_eq!(certainty.kind(), TypeKind::BackboneElement);
        let subcomponent = certainty.field("subcomponent").unwrap();
        assert!(subcomponent.is_array());
        assert_eq!(
            subcomponent.field_type,
            FieldType::Complex("EvidenceCertainty".into())
        );
        assert_eq!(
            registry.resolve("Evidence").unwrap().field("certainty").unwrap().field_type,
            FieldType::Complex("EvidenceCertainty".into())
        );
    }

    #[test]
    fn attachment_declares_its_file_id() {
        let registry = SchemaRegistry::builtin().unwrap();
        let attachment = registry.resolve("Attachment").unwrap();
        assert_eq!(attachment.internal_keys(), ["_file_id"]);
        assert!(!registry.resolve("Coding").unwrap().has_internal_fields());
    }

    #[test]
    fn loaded_schemas_keep_internal_keys_of_the_types_they_replace() {
        let mut registry = SchemaRegistry::builtin().unwrap();
        let fields = registry.resolve("Attachment").unwrap().fields().to_vec();
        registry.extend_keeping_internal_keys([
            TypeSchema::new("Attachment", TypeKind::ComplexType, fields),
            TypeSchema::new("Widget", TypeKind::ComplexType, Vec::new()),
        ]);
        assert!(registry
            .resolve("Attachment")
            .unwrap()
            .accepts_internal_key("_file_id"));
        assert!(!registry.resolve("Widget").unwrap().has_internal_fields());
    }

    #[test]
    fn resource_lookup_rejects_data_types() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert!(registry.resource("Consent").is_ok());
        assert!(matches!(
            registry.resource("Coding"),
            Err(Error::NotAResource(name)) if name == "Coding"
        ));
        assert!(matches!(
            registry.resource("Widget"),
            Err(Error::UnknownType(name)) if name == "Widget"
        ));
    }

    #[test]
    fn resources_inherit_domain_resource_fields() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = registry.resolve("AppointmentResponse").unwrap();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            &names[..9],
            [
                "id",
                "meta",
                "implicitRules",
                "language",
                "text",
                "contained",
                "extension",
                "modifierExtension",
                "identifier"
            ]
        );
        assert_eq!(schema.field("contained").unwrap().field_type, FieldType::Resource);
        assert_eq!(
            registry.resolve("ConsentProvision").unwrap().kind(),
            TypeKind::BackboneElement
        );
    }

    #[test]
    fn registering_replaces_by_name() {
        let mut registry = SchemaRegistry::new();
        assert!(registry
            .register(TypeSchema::new("Thing", TypeKind::Resource, Vec::new()))
            .is_none());
        assert!(registry
            .register(TypeSchema::new("Thing", TypeKind::Resource, Vec::new()))
            .is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn r4_table_is_complete() {
        assert!(r4_resource_types().len() >= 145);
        assert!(is_r4_resource_type("Patient"));
        assert!(!is_r4_resource_type("ExportStatus"));
    }
}
