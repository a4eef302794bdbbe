//! Annotation data model shared by the server store and client mirrors.

pub mod assembly;
pub mod feature;
pub mod store;
pub mod user;

pub use assembly::{Assembly, AssemblySnapshot, RefSeq, RefSeqSpec};
pub use feature::{FeatureNode, FeatureSnapshot, FeatureTree, Strand};
pub use store::{AnnotationStore, StoreEvent};
pub use user::{Role, User};
