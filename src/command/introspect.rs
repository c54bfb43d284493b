use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use tabled::{
    Table, Tabled,
    settings::{Padding, Style, object::Columns},
};

use scriptbox::catalog::{load_unit_file, save_unit_file};
use scriptbox::config::Config;
use scriptbox::introspect::Introspection;

use super::build_engine;

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "KIND")]
    kind: &'static str,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    tag: &'static str,
    #[tabled(rename = "DEFAULT")]
    default: String,
    #[tabled(rename = "DESCRIPTION")]
    description: String,
}

fn rows(introspection: &Introspection) -> Vec<FieldRow> {
    let inputs = introspection.inputs().into_iter().map(|input| FieldRow {
        kind: "input",
        name: input.name,
        tag: input.tag.name(),
        default: input.default.map(|v| v.to_string()).unwrap_or_default(),
        description: input.description,
    });
    let outputs = introspection.outputs().into_iter().map(|output| FieldRow {
        kind: "output",
        name: output.name,
        tag: output.tag.name(),
        default: String::new(),
        description: output.description,
    });
    inputs.chain(outputs).collect()
}

pub fn run(fragment: &Path, json: bool, update: Option<&Path>) -> Result<()> {
    let code = fs::read_to_string(fragment)
        .with_context(|| format!("Failed to read {}", fragment.display()))?;
    let config = Config::load()?;
    let engine = build_engine(&config)?;
    let introspection = engine.introspect(&code)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&introspection)?);
    } else {
        let rows = rows(&introspection);
        let mut table = Table::new(rows);
        table
            .with(Style::blank())
            .modify(Columns::new(0..4), Padding::new(0, 1, 0, 0));
        println!("{table}");
        if let Some(doc) = introspection.docstring.as_deref().filter(|d| !d.is_empty()) {
            println!("\n{}", style(doc).dim());
        }
    }

    if let Some(unit_path) = update {
        let mut unit = load_unit_file(unit_path)?;
        unit.code = code;
        unit.apply_introspection(&introspection);
        save_unit_file(unit_path, &unit)?;
        println!(
            "{} Updated {}",
            style("✔").green(),
            style(unit_path.display()).bold()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_list_inputs_before_outputs() {
        let introspection: Introspection = serde_json::from_value(json!({
            "inputSchema": {
                "type": "object",
                "properties": {
                    "count": {"type": "integer", "default": 3, "description": "How many"}
                },
                "required": []
            },
            "outputSchema": {
                "type": "object",
                "properties": {"result": {"type": "string"}}
            },
            "docstring": null
        }))
        .unwrap();

        let rows = rows(&introspection);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].kind, "input");
        assert_eq!(rows[0].name, "count");
        assert_eq!(rows[0].default, "3");
        assert_eq!(rows[0].description, "How many");
        assert_eq!(rows[1].kind, "output");
        assert_eq!(rows[1].name, "result");
    }
}
