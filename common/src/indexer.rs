use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;

use crate::engine::{App, KeyValue};
use crate::wordcount::normalize;

/// Índice invertido: palabra -> documentos donde aparece.
pub const APP: App = App {
    name: "indexer",
    map,
    reduce,
};

/// Emite (palabra, documento) una sola vez por palabra distinta.
pub fn map(filename: &str, contents: &str) -> Result<Vec<KeyValue>> {
    // el valor no puede tener saltos de línea; usamos sólo el nombre del archivo
    let doc = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    let words: BTreeSet<String> = contents
        .split_whitespace()
        .map(normalize)
        .filter(|w| !w.is_empty())
        .collect();

    Ok(words
        .into_iter()
        .map(|w| KeyValue::new(w, doc.clone()))
        .collect())
}

/// "<cantidad> <doc1>,<doc2>,..." con documentos ordenados y sin repetir.
pub fn reduce(_key: &str, values: &[String]) -> Result<String> {
    let docs: BTreeSet<&str> = values.iter().map(|s| s.as_str()).collect();
    let joined = docs.iter().copied().collect::<Vec<_>>().join(",");
    Ok(format!("{} {}", docs.len(), joined))
}
