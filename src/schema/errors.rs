use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("invalid provider address '{input}': {message}")]
    InvalidAddr { input: String, message: String },

    #[error("no provider schema defined for {addr}, possible values include {known:?}{}", suggestion_suffix(.suggestion))]
    UnknownProvider {
        addr: String,
        known: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid provider schema JSON{}: {source}", path_suffix(.path))]
    Json {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean {s}?)"),
        None => String::new(),
    }
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" ({})", p.display()),
        None => String::new(),
    }
}
