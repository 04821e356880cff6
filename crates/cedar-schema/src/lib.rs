//! Build definition schema for cedar.
//!
//! This crate owns the declarative side of an image build: the typed
//! `BuildDefinition` decoded from YAML, the hand-written structural schema
//! that guards decoding, the cross-field business rules, and the gadget
//! layout types that later steps compute and checkpoint.

pub mod definition;
pub mod gadget;
pub mod schema;
pub mod validate;

pub use definition::{
    Artifacts, BuildDefinition, CloudInit, CopyFile, Customization, Execute, ExtraPackage,
    ExtraPpa, ExtraSnap, Gadget, GadgetType, ImageArtifact, ImageClass, MakeDir, Manual,
    NamedArtifact, Pocket, Rootfs, Seed, Tarball, TouchFile,
};
pub use gadget::{GadgetInfo, GadgetVolume, VolumeStructure, SYSTEM_DATA_ROLE};
pub use validate::{
    check_rules, is_absolute_clean, load_definition, validate_str, DefinitionError, ErrorKind,
    ValidationError, ValidationResult,
};
