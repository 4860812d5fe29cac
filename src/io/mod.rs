// Copyright @yucwang 2026

pub mod image_writer;
pub mod settings_loader;
