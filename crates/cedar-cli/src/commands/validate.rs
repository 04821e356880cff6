use super::{Failure, EXIT_DEFINITION_ERROR, EXIT_SUCCESS};
use cedar_core::{step_names, RootfsSource};
use cedar_schema::validate_str;
use std::fs;
use std::path::Path;

/// `existing_tree` plans as if `--image-path` were given to `build`.
pub fn run(definition: &Path, existing_tree: bool) -> Result<u8, Failure> {
    let text = fs::read_to_string(definition).map_err(|e| {
        Failure::new(
            EXIT_DEFINITION_ERROR,
            format!("failed to read {}: {e}", definition.display()),
        )
    })?;
    let (def, result) = validate_str(&text)
        .map_err(|e| Failure::new(EXIT_DEFINITION_ERROR, e.to_string()))?;

    match def {
        Some(def) if result.is_valid() => {
            println!("{} is valid", definition.display());
            let source = RootfsSource::select(&def, existing_tree);
            for (i, name) in step_names(&def, source).iter().enumerate() {
                println!("[{i}] {name}");
            }
            Ok(EXIT_SUCCESS)
        }
        _ => Err(Failure::new(EXIT_DEFINITION_ERROR, result.to_string())),
    }
}
