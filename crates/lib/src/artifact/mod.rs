//! Artifacts: file nodes of the build graph.
//!
//! An artifact is either a source file supplied by the project model or a
//! generated file declared as the output of a transformer. Artifacts live in
//! the graph arena and are referenced by [`ArtifactId`].

mod types;

pub use types::{Artifact, ArtifactId, ArtifactKind, FileTags};
