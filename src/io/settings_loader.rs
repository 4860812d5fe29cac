// Copyright @yucwang 2026

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::core::error::RenderError;
use crate::core::settings::RendererSettings;
use crate::math::constants::Float;

#[derive(Debug)]
pub enum SettingsLoadError {
    Io(std::io::Error),
    Parse(String),
    MissingField(&'static str),
    Invalid(RenderError),
}

impl From<std::io::Error> for SettingsLoadError {
    fn from(err: std::io::Error) -> Self {
        SettingsLoadError::Io(err)
    }
}

impl From<RenderError> for SettingsLoadError {
    fn from(err: RenderError) -> Self {
        SettingsLoadError::Invalid(err)
    }
}

impl fmt::Display for SettingsLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsLoadError::Io(e) => write!(f, "failed to read settings: {}", e),
            SettingsLoadError::Parse(msg) => write!(f, "failed to parse settings: {}", msg),
            SettingsLoadError::MissingField(field) => write!(f, "settings file has no <{}> element", field),
            SettingsLoadError::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SettingsLoadError {}

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<RendererSettings, SettingsLoadError> {
    let path = path.as_ref();
    log::info!("Loading renderer settings from: {}.", path.display());
    let xml = fs::read_to_string(path)?;
    parse_settings(&xml)
}

/// Parses a `<renderer>` element. Unlisted settings keep their defaults.
pub fn parse_settings(xml: &str) -> Result<RendererSettings, SettingsLoadError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut defaults: HashMap<String, String> = HashMap::new();
    let mut settings = RendererSettings::default();
    let mut found_renderer = false;
    let mut in_renderer = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "renderer" => {
                        found_renderer = true;
                        in_renderer = true;
                    }
                    "default" => {
                        let mut key: Option<String> = None;
                        let mut value: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"name" => key = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                b"value" => value = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                _ => {}
                            }
                        }
                        if let (Some(k), Some(v)) = (key, value) {
                            defaults.insert(k, v);
                        }
                    }
                    "float" | "integer" | "boolean" | "string" | "rgb" if in_renderer => {
                        let mut name: Option<String> = None;
                        let mut value: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"name" => name = Some(attr.unescape_value().unwrap_or_default().to_string()),
                                b"value" => value = Some(resolve_value(&attr.unescape_value().unwrap_or_default(), &defaults)),
                                _ => {}
                            }
                        }
                        match (name, value) {
                            (Some(name), Some(value)) => apply_setting(&mut settings, &tag, &name, &value)?,
                            _ => return Err(SettingsLoadError::Parse(format!("<{}> needs name and value", tag))),
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"renderer" {
                    in_renderer = false;
                }
            }
            Err(e) => {
                return Err(SettingsLoadError::Parse(format!(
                    "error at position {}: {:?}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !found_renderer {
        return Err(SettingsLoadError::MissingField("renderer"));
    }
    settings.validate()?;
    Ok(settings)
}

fn expect_tag(tag: &str, expected: &str, name: &str) -> Result<(), SettingsLoadError> {
    if tag == expected {
        Ok(())
    } else {
        Err(SettingsLoadError::Parse(format!("setting {} must be a <{}>, is <{}>", name, expected, tag)))
    }
}

fn apply_setting(settings: &mut RendererSettings, tag: &str, name: &str, value: &str) -> Result<(), SettingsLoadError> {
    match name {
        "filter_mode" => {
            expect_tag(tag, "string", name)?;
            settings.filter_mode = value.parse()?;
        }
        "boundary_mode" => {
            expect_tag(tag, "string", name)?;
            settings.boundary_mode = value.parse()?;
        }
        "mip_mode" => {
            expect_tag(tag, "string", name)?;
            settings.mip_mode = value.parse()?;
        }
        "blend_mode" => {
            expect_tag(tag, "string", name)?;
            settings.blend_mode = value.parse()?;
        }
        "blend_path" => {
            expect_tag(tag, "string", name)?;
            settings.blend_path = value.parse()?;
        }
        "num_mips" => {
            expect_tag(tag, "integer", name)?;
            settings.num_mips = parse_usize(value)?;
        }
        "mip_bias" => {
            expect_tag(tag, "float", name)?;
            settings.mip_bias = parse_float(value)?;
        }
        "gradient_mip_bias_add" => {
            expect_tag(tag, "float", name)?;
            settings.gradient_mip_bias_add = parse_float(value)?;
        }
        "scattering_ratio" => {
            expect_tag(tag, "float", name)?;
            settings.scattering_ratio = parse_float(value)?;
        }
        "luma" => {
            expect_tag(tag, "rgb", name)?;
            settings.luma = parse_rgb(value)?;
        }
        "sample_gradients" | "fused" | "allow_fused" | "global_sampling" | "strict_static" | "check_grids" | "render_as_sdf" => {
            expect_tag(tag, "boolean", name)?;
            let flag = parse_bool(value)?;
            match name {
                "sample_gradients" => settings.sample_gradients = flag,
                "fused" | "allow_fused" => settings.fused = flag,
                "global_sampling" => settings.global_sampling = flag,
                "strict_static" => settings.strict_static = flag,
                "check_grids" => settings.check_grids = flag,
                _ => settings.render_as_sdf = flag,
            }
        }
        _ => return Err(SettingsLoadError::Parse(format!("unknown setting: {}", name))),
    }
    Ok(())
}

fn resolve_value(raw: &str, defaults: &HashMap<String, String>) -> String {
    let mut out = raw.to_string();
    for (k, v) in defaults {
        out = out.replace(&format!("${}", k), v);
    }
    out
}

fn parse_float(value: &str) -> Result<Float, SettingsLoadError> {
    value.trim().parse::<Float>().map_err(|_| SettingsLoadError::Parse(format!("invalid float: {}", value)))
}

fn parse_usize(value: &str) -> Result<usize, SettingsLoadError> {
    value.trim().parse::<usize>().map_err(|_| SettingsLoadError::Parse(format!("invalid integer: {}", value)))
}

fn parse_bool(value: &str) -> Result<bool, SettingsLoadError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(SettingsLoadError::Parse(format!("invalid boolean: {}", value))),
    }
}

fn parse_rgb(value: &str) -> Result<[Float; 3], SettingsLoadError> {
    let parts: Vec<&str> = value.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    if parts.len() != 3 {
        return Err(SettingsLoadError::Parse(format!("invalid rgb: {}", value)));
    }
    Ok([parse_float(parts[0])?, parse_float(parts[1])?, parse_float(parts[2])?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{BlendMode, BoundaryMode, MipMode};

    #[test]
    fn test_parse_settings_with_defaults() {
        let xml = r#"
            <renderer>
                <default name="mips" value="3"/>
                <string name="boundary_mode" value="CLAMP"/>
                <string name="blend_mode" value="ADDITIVE"/>
                <string name="mip_mode" value="NEAREST"/>
                <integer name="num_mips" value="$mips"/>
                <float name="mip_bias" value="0.5"/>
                <boolean name="fused" value="true"/>
                <rgb name="luma" value="0.3, 0.6, 0.1"/>
            </renderer>"#;
        let settings = parse_settings(xml).unwrap();
        assert_eq!(settings.boundary_mode, BoundaryMode::Clamp);
        assert_eq!(settings.blend_mode, BlendMode::Additive);
        assert_eq!(settings.mip_mode, MipMode::Nearest);
        assert_eq!(settings.num_mips, 3);
        assert_eq!(settings.mip_bias, 0.5);
        assert!(settings.fused);
        assert_eq!(settings.luma, [0.3, 0.6, 0.1]);
        assert!(!settings.check_grids);
    }

    #[test]
    fn test_parse_settings_errors() {
        assert!(matches!(parse_settings("<settings/>"), Err(SettingsLoadError::MissingField("renderer"))));
        assert!(matches!(
            parse_settings(r#"<renderer><float name="num_mips" value="2"/></renderer>"#),
            Err(SettingsLoadError::Parse(_))
        ));
        assert!(matches!(
            parse_settings(r#"<renderer><string name="blend_mode" value="SOFT"/></renderer>"#),
            Err(SettingsLoadError::Invalid(_))
        ));
        assert!(matches!(
            parse_settings(r#"<renderer><float name="scattering_ratio" value="-1"/></renderer>"#),
            Err(SettingsLoadError::Invalid(_))
        ));
    }
}
