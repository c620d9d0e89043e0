// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TienditaError {
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("error de csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("error de json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error de base de datos: {0}")]
    Database(#[from] sqlx::Error),

    #[error("error de excel: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),

    #[error("tabla '{0}' no encontrada")]
    UnknownTable(String),

    #[error("columna '{0}' no encontrada")]
    UnknownColumn(String),

    #[error("la columna '{0}' ya existe")]
    DuplicateColumn(String),

    #[error("fila {index} fuera de rango (la tabla tiene {len} filas)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("entrada inválida: {0}")]
    InvalidInput(String),

    #[error("archivo de datos inexistente o vacío: {0}")]
    MissingDataset(String),

    #[error("no se pudo escribir ninguna fila de '{table}' ({failed} rechazadas)")]
    NothingWritten { table: String, failed: usize },

    #[error("sin columnas en común entre csv y postgres para '{0}'")]
    NoCommonColumns(String),
}

pub type Result<T> = std::result::Result<T, TienditaError>;
