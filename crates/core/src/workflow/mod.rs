pub mod dag;

pub use dag::{validate, WorkflowDag};
