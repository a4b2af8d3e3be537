pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Document from `--input <file>` when given, otherwise from piped stdin.
pub fn read_value(path: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        file::read_document(path)
    } else if let Some(data) = stdin::read_stdin()? {
        Ok(data)
    } else {
        Err("--input <file.json|file.yaml> or stdin required".into())
    }
}

pub fn read_input<T: DeserializeOwned>(path: Option<&str>) -> Result<T, Box<dyn std::error::Error>> {
    Ok(serde_json::from_value(read_value(path)?)?)
}
