// Copyright @yucwang 2021

pub mod computation_node;
pub mod differentiable;
pub mod error;
pub mod field;
pub mod grid_transform;
pub mod settings;
