//! Domain models for the control plane

pub mod application;
pub mod resource;

pub use application::{
    Application, ApplicationFeatures, Function, FunctionMapping, FunctionStatus,
};
pub use resource::ResourceRef;
