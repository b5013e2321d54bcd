use super::{json_pretty, EXIT_SUCCESS};
use gantry_schema::{parse_pipeline_file, StageKind};
use std::path::Path;

pub fn run(pipeline: &Path, json: bool) -> Result<u8, String> {
    let parsed = parse_pipeline_file(pipeline)
        .map_err(|e| format!("pipeline error: {}: {e}", pipeline.display()))?;
    let stages: Vec<&str> = parsed.stages().into_iter().map(StageKind::as_str).collect();

    if json {
        let payload = serde_json::json!({
            "valid": true,
            "name": parsed.name,
            "stages": stages,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        match &parsed.name {
            Some(name) => println!("pipeline '{name}' is valid"),
            None => println!("pipeline is valid"),
        }
        for (i, stage) in stages.iter().enumerate() {
            println!("  {}. {stage}", i + 1);
        }
    }
    Ok(EXIT_SUCCESS)
}
