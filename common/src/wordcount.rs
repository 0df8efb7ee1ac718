use anyhow::Result;

use crate::engine::{App, KeyValue};

pub const APP: App = App {
    name: "wordcount",
    map,
    reduce,
};

/// Limpia un token: sólo alfanumérico y '_', en minúscula.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

/// Emite ("palabra", "1") por cada palabra del contenido.
pub fn map(_filename: &str, contents: &str) -> Result<Vec<KeyValue>> {
    Ok(contents
        .split_whitespace()
        .map(normalize)
        .filter(|w| !w.is_empty())
        .map(|w| KeyValue::new(w, "1"))
        .collect())
}

/// Cuenta cuántas veces apareció la palabra.
pub fn reduce(_key: &str, values: &[String]) -> Result<String> {
    Ok(values.len().to_string())
}
