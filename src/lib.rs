// Copyright @yucwang 2026

#![allow(dead_code)]

pub mod core;
pub mod io;
pub mod kernels;
pub mod math;
pub mod renderers;
pub mod sensors;
