//! Shared blueprint definitions for pipewright.
//!
//! Loaders produce these values from declarative bundle files; the engine consumes them to build
//! concepts and pipes. Nothing in this crate executes anything.

pub mod blueprint;

pub use blueprint::validation::{ValidationErrorType, ValidationReaction, ValidationReactionConfig};
pub use blueprint::{
    BundleBlueprint, ConceptBlueprint, ConceptDefinitionBlueprint, ConceptStructureBlueprint, DomainBlueprint, FieldBlueprint,
    FieldDefinitionBlueprint, FieldTypeBlueprint, PipeBatchBlueprint, PipeBlueprint, PipeComposeBlueprint, PipeConditionBlueprint,
    PipeExtractBlueprint, PipeFuncBlueprint, PipeImgGenBlueprint, PipeLlmBlueprint, PipeParallelBlueprint, PipeSequenceBlueprint,
    PipeSignatureBlueprint, SubPipeBlueprint,
};
