// src/schema.rs

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Error;
use schemars::schema_for;

use crate::{color::NodeColor, flow::model::Document};

pub const FLOW_SCHEMA_FILE: &str = "flow.schema.json";
pub const COLOR_SCHEMA_FILE: &str = "node-color.schema.json";

/// Write the JSON Schemas for a stored document and a node color into
/// `out_dir`, returning the document schema path.
pub fn write_schema(out_dir: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(out_dir)?;

    let flow_schema = schema_for!(Document);
    let flow_path = out_dir.join(FLOW_SCHEMA_FILE);
    fs::write(&flow_path, serde_json::to_string_pretty(&flow_schema)?)?;

    let color_schema = schema_for!(NodeColor);
    fs::write(out_dir.join(COLOR_SCHEMA_FILE), serde_json::to_string_pretty(&color_schema)?)?;

    Ok(flow_path)
}
