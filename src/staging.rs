// src/staging.rs

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};

use crate::{error::Result, keys::operator_view, table::Table};

pub const CHANGE_LOG: &str = "log_cambios";

fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn table_name(path: &Path) -> Option<String> {
    path.file_stem().and_then(|stem| stem.to_str()).map(str::to_string)
}

/// Load every staged table keyed by file stem. Files that fail to parse are skipped.
pub fn load_tables(dir: &Path) -> Result<BTreeMap<String, Table>> {
    let mut tables = BTreeMap::new();

    for path in csv_files(dir)? {
        let Some(name) = table_name(&path) else { continue };
        if name == CHANGE_LOG {
            continue;
        }
        match Table::read_csv(&path) {
            Ok(table) => {
                tracing::debug!(table = %name, rows = table.len(), "loaded staged table");
                tables.insert(name, table);
            }
            Err(error) => tracing::error!(table = %name, %error, "could not load staged table"),
        }
    }

    tracing::info!(count = tables.len(), dir = %dir.display(), "staged tables loaded");
    Ok(tables)
}

pub fn save_table(dir: &Path, name: &str, table: &Table) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", name));
    table.write_csv(&path)?;
    tracing::info!(table = name, rows = table.len(), "saved to staging");
    Ok(path)
}

pub fn save_tables(dir: &Path, tables: &BTreeMap<String, Table>) -> Result<()> {
    for (name, table) in tables {
        save_table(dir, name, table)?;
    }
    Ok(())
}

/// Copy original exports into the staging area, leaving already staged tables untouched.
/// Returns the names of the tables copied.
pub fn seed_from_original(original: &Path, auxiliar: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(auxiliar)?;
    let mut copied = Vec::new();

    for path in csv_files(original)? {
        let Some(name) = table_name(&path) else { continue };
        let target = auxiliar.join(format!("{}.csv", name));
        if name == CHANGE_LOG || target.exists() {
            continue;
        }
        // round-trip through the parser so malformed exports fail here and not at sync time
        let table = Table::read_csv(&path)?;
        table.write_csv(&target)?;
        copied.push(name);
    }

    Ok(copied)
}

pub fn record_changes(dir: &Path, table: &str, changes: &[String]) -> Result<()> {
    record_changes_at(dir, table, changes, Local::now().naive_local())
}

pub fn record_changes_at(dir: &Path, table: &str, changes: &[String], at: NaiveDateTime) -> Result<()> {
    fs::create_dir_all(dir)?;
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(format!("{}.txt", CHANGE_LOG)))?;

    writeln!(log, "\n[{}] {}", at.format("%Y-%m-%d %H:%M:%S"), table)?;
    for change in changes {
        writeln!(log, "   - {}", change)?;
    }
    Ok(())
}

pub fn export_json(dir: &Path, name: &str, table: &Table) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", name));
    operator_view(table).write_json(&path)?;
    Ok(path)
}

pub fn export_xlsx(dir: &Path, name: &str, table: &Table) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.xlsx", name));
    // sheet names are capped at 31 characters
    let sheet = name.chars().take(31).collect::<String>();
    operator_view(table).write_xlsx(&path, &sheet)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn loads_csv_tables_except_the_log() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "clientes.csv", "id_cliente,nombre\n1,Ana\n");
        write(dir.path(), "provincias.csv", "id_provincia,nombre\n1,Salta\n");
        write(dir.path(), "log_cambios.csv", "x\n1\n");
        write(dir.path(), "notas.txt", "ignored");

        let tables = load_tables(dir.path()).unwrap();
        assert_eq!(tables.keys().cloned().collect::<Vec<_>>(), vec!["clientes", "provincias"]);
        assert_eq!(tables["clientes"].len(), 1);
    }

    #[test]
    fn save_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("aux");
        let table = Table::from_reader("id,nombre\n1,Ana\n2,\n".as_bytes()).unwrap();
        save_table(&staging, "clientes", &table).unwrap();

        let reloaded = load_tables(&staging).unwrap();
        assert_eq!(reloaded["clientes"], table);
    }

    #[test]
    fn seed_skips_staged_tables() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("orig");
        let auxiliar = dir.path().join("aux");
        fs::create_dir_all(&original).unwrap();
        fs::create_dir_all(&auxiliar).unwrap();
        write(&original, "clientes.csv", "id,nombre\n1,Ana\n");
        write(&original, "rubros.csv", "id,descripcion\n1,Almacen\n");
        write(&auxiliar, "clientes.csv", "id,nombre\n1,Editado\n");

        let copied = seed_from_original(&original, &auxiliar).unwrap();
        assert_eq!(copied, vec!["rubros".to_string()]);
        let clientes = fs::read_to_string(auxiliar.join("clientes.csv")).unwrap();
        assert!(clientes.contains("Editado"));
    }

    #[test]
    fn change_log_appends_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap().and_hms_opt(14, 5, 0).unwrap();
        record_changes_at(dir.path(), "clientes", &["Agregada columna 'email'".to_string()], at).unwrap();
        record_changes_at(dir.path(), "rubros", &[], at).unwrap();

        let log = fs::read_to_string(dir.path().join("log_cambios.txt")).unwrap();
        assert_eq!(
            log,
            "\n[2024-03-09 14:05:00] clientes\n   - Agregada columna 'email'\n\n[2024-03-09 14:05:00] rubros\n"
        );
    }

    #[test]
    fn exports_operator_view() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::from_reader("id_cliente,nombre\n1,Ana\n".as_bytes()).unwrap();

        let json_path = export_json(dir.path(), "clientes", &table).unwrap();
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(json_path).unwrap()).unwrap();
        assert_eq!(json, serde_json::json!([{ "nombre": "Ana" }]));

        let xlsx_path = export_xlsx(dir.path(), "clientes", &table).unwrap();
        assert!(xlsx_path.exists());
    }
}
