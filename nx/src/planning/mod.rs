//! Planning: decomposition, dependency resolution, estimation, repo maps

mod decomposer;
mod estimator;
mod repomap;
mod resolver;

pub use decomposer::{Decomposed, DecomposeError, DecomposeOpts, DecomposerConfig, TaskDecomposer};
pub use estimator::{ComplexityLevel, EstimatorConfig, TaskCategory, TimeEstimator, infer_category, infer_complexity};
pub use repomap::{format_evolution_context, generate_repo_map};
pub use resolver::{DependencyResolver, ResolverError, ValidationReport};
