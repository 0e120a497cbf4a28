//! Turns an authoring-side scene description into a 4DS [`SceneGraph`].

pub mod builder;
pub mod source;

use builder::{BuildOptions, BuildResult, ProgressEventListener, SceneBuilder};
use fourds::scene::SceneGraph;
use source::SourceScene;

pub use builder::BuildError;

pub fn build_scene(
    source: &SourceScene,
    options: BuildOptions,
    progress: &mut dyn ProgressEventListener,
) -> BuildResult<SceneGraph> {
    SceneBuilder::new(source, options).build(progress)
}
