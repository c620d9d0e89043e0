// src/keys.rs

use std::collections::{BTreeMap, HashMap};

use crate::table::{ColumnType, Table, Value};

// fragments that mark a key column anywhere in its name; "identificador" only counts for detection
const HIDDEN_TOKENS: [&str; 7] = ["id", "codigo", "cod", "key", "clave", "numero", "nro"];
const DETECT_TOKENS: [&str; 8] = ["id", "codigo", "cod", "numero", "nro", "clave", "key", "identificador"];

fn has_token(name: &str, tokens: &[&str]) -> bool {
    let name = name.to_lowercase();
    tokens.iter().any(|token| name.contains(token))
}

/// Key columns are hidden from the operator and filled automatically.
pub fn is_id_column(name: &str) -> bool {
    has_token(name, &HIDDEN_TOKENS)
}

pub fn hidden_columns(table: &Table) -> Vec<String> {
    table.columns().iter().filter(|c| is_id_column(c)).cloned().collect()
}

/// Operator view; falls back to every column when all of them are keys.
pub fn visible_columns(table: &Table) -> Vec<String> {
    let visible = table.columns().iter().filter(|c| !is_id_column(c)).cloned().collect::<Vec<_>>();
    if visible.is_empty() {
        table.columns().to_vec()
    } else {
        visible
    }
}

pub fn operator_view(table: &Table) -> Table {
    table.project(&visible_columns(table)).unwrap_or_else(|_| table.clone())
}

fn is_numeric_column(table: &Table, column: &str) -> bool {
    matches!(table.column_type(column), Some(ColumnType::Int | ColumnType::Float))
}

fn is_sequential(table: &Table, column: &str) -> bool {
    let Ok(values) = table.column_values(column) else { return false };
    let numbers = values.iter().map(|v| v.as_f64()).collect::<Option<Vec<_>>>();
    match numbers {
        Some(numbers) => numbers.windows(2).all(|pair| pair[0] < pair[1]),
        None => false,
    }
}

pub fn detect_id_column(table: &Table) -> Option<String> {
    for column in table.columns() {
        if has_token(column, &DETECT_TOKENS) {
            return Some(column.clone());
        }
        if is_numeric_column(table, column) && is_sequential(table, column) {
            return Some(column.clone());
        }
    }

    table
        .columns()
        .iter()
        .find(|c| is_numeric_column(table, c))
        .or_else(|| table.columns().first())
        .cloned()
}

pub fn next_id(table: &Table, column: &str) -> i64 {
    if table.is_empty() {
        return 1;
    }
    let fallback = table.len() as i64 + 1;
    let Ok(values) = table.column_values(column) else { return fallback };

    values
        .iter()
        .filter_map(|v| v.as_f64())
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .and_then(|max| (max as i64).checked_add(1))
        .unwrap_or(fallback)
}

pub fn reindex_ids(table: &mut Table, column: &str) {
    let values = (1..=table.len() as i64).map(Value::Int).collect();
    if let Err(error) = table.set_column(column, values) {
        tracing::warn!(%error, column, "could not reindex ids");
    }
}

/// Coerce key columns to numbers, drop rows repeating the primary id and renumber it.
/// Returns the number of rows removed.
pub fn clean_ids(table: &mut Table) -> usize {
    let primary = detect_id_column(table);

    for column in hidden_columns(table) {
        if let Ok(values) = table.column_values(&column) {
            let coerced = values
                .iter()
                .map(|v| match v.as_f64() {
                    Some(f) if f.fract() == 0.0 => Value::Int(f as i64),
                    Some(f) => Value::Float(f),
                    None => Value::Null,
                })
                .collect();
            let _ = table.set_column(&column, coerced);
        }
    }

    let Some(primary) = primary else { return 0 };
    let removed = table.dedup_by(&primary).unwrap_or(0);
    reindex_ids(table, &primary);
    removed
}

// first non-empty numeric id of the referenced table
fn first_available_id(reference: &Table) -> i64 {
    let Some(column) = detect_id_column(reference) else { return 1 };
    reference
        .column_values(&column)
        .ok()
        .and_then(|values| values.iter().filter(|v| !v.is_null()).find_map(|v| v.as_i64()))
        .unwrap_or(1)
}

// `id_localidad` resolves to `localidad` or its plural
fn referenced_table<'a>(references: &'a BTreeMap<String, Table>, name: &str) -> Option<&'a Table> {
    [name.to_string(), format!("{}s", name), format!("{}es", name)]
        .iter()
        .find_map(|candidate| references.get(candidate))
}

/// Fill every hidden key column that `record` leaves empty.
///
/// The primary id gets the next free value, `id_<table>` columns point at the
/// first row of a loaded `<table>` (1 when it isn't loaded) and any other key
/// column gets its own next value.
pub fn generate_ids(table: &Table, record: &mut HashMap<String, Value>, references: &BTreeMap<String, Table>) {
    let primary = detect_id_column(table);

    for column in hidden_columns(table) {
        if record.get(&column).map_or(false, |v| !v.is_null()) {
            continue;
        }

        let value = if primary.as_deref() == Some(column.as_str()) {
            next_id(table, &column)
        } else if let Some(referenced) = column.strip_prefix("id_") {
            referenced_table(references, referenced).map(first_available_id).unwrap_or(1)
        } else {
            next_id(table, &column)
        };

        record.insert(column, Value::Int(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn key_columns_match_anywhere_in_the_name() {
        assert!(is_id_column("id_cliente"));
        assert!(is_id_column("codigo_postal"));
        assert!(is_id_column("nro"));
        assert!(is_id_column("idcliente"));
        assert!(is_id_column("IdCliente"));
        assert!(is_id_column("clienteid"));
        assert!(is_id_column("codigoPostal"));
        assert!(is_id_column("apellido"));
        assert!(is_id_column("cantidad"));
        assert!(!is_id_column("nombre"));
        assert!(!is_id_column("ciudad"));
    }

    #[test]
    fn detects_fused_key_names() {
        let clientes = table("nombre,IdCliente\nAna,1\n");
        assert_eq!(detect_id_column(&clientes).as_deref(), Some("IdCliente"));
        assert_eq!(visible_columns(&clientes), vec!["nombre".to_string()]);
    }

    #[test]
    fn view_hides_keys_unless_all_are_keys() {
        let clientes = table("id_cliente,nombre,id_localidad\n1,Ana,3\n");
        assert_eq!(visible_columns(&clientes), vec!["nombre".to_string()]);
        assert_eq!(hidden_columns(&clientes).len(), 2);

        let only_keys = table("id_a,id_b\n1,2\n");
        assert_eq!(visible_columns(&only_keys).len(), 2);
        assert_eq!(operator_view(&clientes).width(), 1);
    }

    #[test]
    fn detects_primary_id() {
        assert_eq!(detect_id_column(&table("nombre,id_cliente\nAna,1\n")).as_deref(), Some("id_cliente"));
        assert_eq!(detect_id_column(&table("nombre,orden\nAna,5\nLeo,7\n")).as_deref(), Some("orden"));
        assert_eq!(detect_id_column(&table("nombre,monto\nAna,5\nLeo,2\n")).as_deref(), Some("monto"));
        assert_eq!(detect_id_column(&table("nombre,ciudad\nAna,Salta\n")).as_deref(), Some("nombre"));
        assert_eq!(detect_id_column(&Table::default()), None);
    }

    #[test]
    fn next_id_uses_max() {
        let provincias = table("id_provincia,nombre\n4,Salta\n2,Jujuy\n");
        assert_eq!(next_id(&provincias, "id_provincia"), 5);
        assert_eq!(next_id(&provincias, "missing"), 3);
        assert_eq!(next_id(&table("id,nombre\nx,Ana\n"), "id"), 2);
        assert_eq!(next_id(&table("id,nombre\n"), "id"), 1);
    }

    #[test]
    fn next_id_at_the_integer_limit_falls_back_to_row_count() {
        let full = table("id,nombre\n9223372036854775807,Ana\n");
        assert_eq!(next_id(&full, "id"), 2);

        let mut record = HashMap::new();
        generate_ids(&full, &mut record, &BTreeMap::new());
        assert_eq!(record["id"], Value::Int(2));
    }

    #[test]
    fn clean_drops_duplicates_and_renumbers() {
        let mut clientes = table("id_cliente,nombre\n3,Ana\n3,Ana bis\n7,Leo\nabc,Sol\n");
        let removed = clean_ids(&mut clientes);
        // "abc" becomes empty and stays as a distinct key
        assert_eq!(removed, 1);
        assert_eq!(clientes.len(), 3);
        let ids = clientes.column_values("id_cliente").unwrap().into_iter().cloned().collect::<Vec<_>>();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn generates_primary_and_foreign_keys() {
        let mut references = BTreeMap::new();
        references.insert("localidades".to_string(), table("id_localidad,nombre\n,Sin dato\n8,Salta\n"));

        let clientes = table("id_cliente,nombre,id_localidad,id_condicion_iva,cod_interno\n1,Ana,8,1,10\n4,Leo,8,2,11\n");
        let mut record = HashMap::new();
        record.insert("nombre".to_string(), Value::Text("Sol".into()));
        generate_ids(&clientes, &mut record, &references);

        assert_eq!(record["id_cliente"], Value::Int(5));
        assert_eq!(record["id_localidad"], Value::Int(8));
        assert_eq!(record["id_condicion_iva"], Value::Int(1));
        assert_eq!(record["cod_interno"], Value::Int(12));
    }

    #[test]
    fn keeps_keys_already_given() {
        let clientes = table("id_cliente,nombre\n1,Ana\n");
        let mut record = HashMap::new();
        record.insert("id_cliente".to_string(), Value::Int(40));
        generate_ids(&clientes, &mut record, &BTreeMap::new());
        assert_eq!(record["id_cliente"], Value::Int(40));
    }
}
