// src/db.rs

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    time::Duration,
};

use futures::stream::TryStreamExt;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Connection, PgConnection, PgPool, Postgres, Row, Transaction,
};

use crate::{
    config::Config,
    error::{Result, TienditaError},
    table::{Table, Value},
};

// tables without complex dependencies go first
pub const FIRST_PASS: [&str; 8] = [
    "provincias",
    "localidades",
    "condicion_iva",
    "rubros",
    "proveedores",
    "sucursales",
    "clientes",
    "productos",
];
pub const SECOND_PASS: [&str; 3] = ["facturas_encabezado", "facturas_detalle", "ventas"];

const DEFERRED_TABLES: [&str; 2] = ["facturas_encabezado", "facturas_detalle"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PgColumn {
    pub name: String,
    pub udt: String,
}

impl PgColumn {
    fn is_integer(&self) -> bool {
        matches!(self.udt.as_str(), "int2" | "int4" | "int8")
    }

    // udt names feed straight into CAST, so anything unusual falls back to text
    fn cast_type(&self) -> &str {
        if !self.udt.is_empty() && self.udt.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            &self.udt
        } else {
            "text"
        }
    }

    fn cell(&self, value: &Value) -> Option<String> {
        match value {
            value if value.is_null() => None,
            Value::Float(float) if self.is_integer() && float.fract() == 0.0 => Some(format!("{}", *float as i64)),
            other => other.to_text(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableSync {
    Skipped,
    Upserted { written: usize, rejected: usize },
    Replaced { rows: u64 },
}

impl fmt::Display for TableSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSync::Skipped => write!(f, "vacía, omitida"),
            TableSync::Upserted { written, rejected: 0 } => write!(f, "{} filas insertadas/actualizadas", written),
            TableSync::Upserted { written, rejected } => {
                write!(f, "{} filas insertadas/actualizadas, {} rechazadas", written, rejected)
            }
            TableSync::Replaced { rows } => write!(f, "reemplazada con {} filas", rows),
        }
    }
}

#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub omitted: usize,
    pub result: std::result::Result<TableSync, String>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<TableOutcome>,
    pub not_synchronized: Vec<String>,
}

impl SyncReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("RESUMEN DE SINCRONIZACIÓN\n");
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(sync) => out.push_str(&format!("  ok     {}: {}\n", outcome.table, sync)),
                Err(error) => out.push_str(&format!("  error  {}: {}\n", outcome.table, error)),
            }
            if outcome.omitted > 0 {
                out.push_str(&format!("         {} filas omitidas por referencias inexistentes\n", outcome.omitted));
            }
        }
        for name in &self.not_synchronized {
            out.push_str(&format!("  fuera del orden de sincronización: {}\n", name));
        }
        out.push_str(&format!("Tablas sincronizadas: {}/{}\n", self.succeeded(), self.attempted()));
        out
    }
}

#[derive(Clone, Debug)]
pub struct ServerInfo {
    pub version: String,
    pub tables: Vec<String>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn upsert_statement(table: &str, columns: &[PgColumn], primary_key: &str) -> String {
    let names = columns.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ");
    let values = columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("CAST(${} AS {})", i + 1, c.cast_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = columns
        .iter()
        .filter(|c| c.name != primary_key)
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
        .collect::<Vec<_>>();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote_ident(table),
        names,
        values,
        quote_ident(primary_key),
        action
    )
}

// the csv writer quotes a lone empty field, FORCE_NULL keeps it NULL
pub fn copy_statement(table: &str, columns: &[PgColumn]) -> String {
    let names = columns.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ");
    format!(
        "COPY {} ({1}) FROM STDIN WITH (FORMAT csv, HEADER true, DELIMITER ',', FORCE_NULL ({1}))",
        quote_ident(table),
        names
    )
}

/// Columns present both in the csv and in postgres, in csv order.
pub fn common_columns(table: &Table, pg_columns: &[PgColumn]) -> Vec<PgColumn> {
    table
        .columns()
        .iter()
        .filter_map(|name| pg_columns.iter().find(|c| &c.name == name).cloned())
        .collect()
}

/// Cells rendered the way postgres will parse them for each target column.
fn prepare_rows(table: &Table, columns: &[PgColumn]) -> Result<Table> {
    let names = columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
    let projected = table.project(&names)?;
    let rows = projected
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .zip(columns)
                .map(|(value, column)| column.cell(value).map(Value::Text).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(Table::from_rows(names, rows))
}

fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::Float(float) if float.fract() == 0.0 => Some(format!("{}", *float as i64)),
        other => other.to_text().map(|t| t.trim().to_string()),
    }
}

/// Keep rows whose parent key (first column containing `keyword`) exists in `parent_ids`.
/// Returns the filtered table and how many rows were dropped.
pub fn retain_existing(table: &Table, keyword: &str, parent_ids: &HashSet<String>) -> (Table, usize) {
    let Some(index) = table.columns().iter().position(|c| c.to_lowercase().contains(keyword)) else {
        return (table.clone(), 0);
    };
    let mut filtered = table.clone();
    filtered.retain_rows(|row| key_text(&row[index]).map_or(false, |key| parent_ids.contains(&key)));
    let omitted = table.len() - filtered.len();
    (filtered, omitted)
}

#[derive(Clone, Debug)]
pub struct DB {
    pub pool: PgPool,
}

impl DB {
    pub async fn new(config: &Config) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        tracing::info!(server = %config.target(), "postgres connection established");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("postgres connection closed");
    }

    pub async fn check(&self) -> Result<ServerInfo> {
        let row = sqlx::query("SELECT version()").fetch_one(&self.pool).await?;
        let version: String = row.try_get(0)?;

        let tables = sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = 'public' ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ServerInfo { version, tables })
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<PgColumn>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT column_name::text, udt_name::text FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(name, udt)| PgColumn { name, udt }).collect())
    }

    pub async fn primary_key(&self, table: &str) -> Result<Option<String>> {
        let key = sqlx::query_scalar::<_, String>(
            "SELECT a.attname::text FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = to_regclass(quote_ident($1)) AND i.indisprimary \
             ORDER BY a.attnum LIMIT 1",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    /// Values of the table's first column, as text. `None` when the table has no columns.
    pub async fn existing_ids(&self, table: &str) -> Result<Option<HashSet<String>>> {
        let Some(first) = self.table_columns(table).await?.into_iter().next() else {
            return Ok(None);
        };

        let statement = format!(
            "SELECT {}::text FROM {} WHERE {} IS NOT NULL",
            quote_ident(&first.name),
            quote_ident(table),
            quote_ident(&first.name)
        );
        let mut cursor = sqlx::query_scalar::<_, String>(&statement).fetch(&self.pool);
        let mut ids = HashSet::new();
        while let Some(id) = cursor.try_next().await? {
            ids.insert(id);
        }
        Ok(Some(ids))
    }

    /// Write one table to postgres: upsert on the primary key when the csv carries it,
    /// otherwise truncate and bulk copy. The whole table is one transaction.
    pub async fn sync_table(&self, name: &str, table: &Table) -> Result<TableSync> {
        if table.is_empty() {
            tracing::warn!(table = name, "empty table, skipping");
            return Ok(TableSync::Skipped);
        }
        if !self.table_exists(name).await? {
            return Err(TienditaError::UnknownTable(name.to_string()));
        }

        let columns = common_columns(table, &self.table_columns(name).await?);
        if columns.is_empty() {
            return Err(TienditaError::NoCommonColumns(name.to_string()));
        }
        let prepared = prepare_rows(table, &columns)?;
        let primary_key = self
            .primary_key(name)
            .await?
            .filter(|key| columns.iter().any(|c| &c.name == key));

        let mut tx = self.pool.begin().await?;
        if DEFERRED_TABLES.contains(&name) {
            sqlx::query("SET CONSTRAINTS ALL DEFERRED").execute(&mut *tx).await?;
        }

        let outcome = match primary_key {
            Some(key) => upsert(&mut tx, name, &prepared, &columns, &key).await,
            None => replace(&mut tx, name, &prepared, &columns).await,
        };

        match outcome {
            Ok(sync) => {
                tx.commit().await?;
                tracing::info!(table = name, %sync, "table synchronized");
                Ok(sync)
            }
            Err(error) => {
                tx.rollback().await?;
                tracing::error!(table = name, %error, "table synchronization rolled back");
                Err(error)
            }
        }
    }

    async fn restrict_to_parent(&self, table: &Table, parent: &str, keyword: &str) -> Result<(Table, usize)> {
        match self.existing_ids(parent).await? {
            Some(ids) => Ok(retain_existing(table, keyword, &ids)),
            None => Ok((table.clone(), 0)),
        }
    }

    /// Synchronize every staged table in dependency order. A failing table is
    /// rolled back and reported without stopping the others.
    pub async fn sync_all(&self, tables: &BTreeMap<String, Table>) -> SyncReport {
        let mut report = SyncReport::default();

        for &name in FIRST_PASS.iter().chain(SECOND_PASS.iter()) {
            let Some(table) = tables.get(name) else { continue };
            tracing::info!(table = name, rows = table.len(), "processing");

            let restricted = match name {
                "facturas_encabezado" if tables.contains_key("clientes") => {
                    self.restrict_to_parent(table, "clientes", "cliente").await
                }
                "facturas_detalle" if tables.contains_key("facturas_encabezado") => {
                    self.restrict_to_parent(table, "facturas_encabezado", "factura").await
                }
                _ => Ok((table.clone(), 0)),
            };

            let (result, omitted) = match restricted {
                Ok((prepared, omitted)) => {
                    if omitted > 0 {
                        tracing::warn!(table = name, omitted, "rows omitted for missing parents");
                    }
                    (self.sync_table(name, &prepared).await, omitted)
                }
                Err(error) => (Err(error), 0),
            };

            report.outcomes.push(TableOutcome {
                table: name.to_string(),
                omitted,
                result: result.map_err(|e| e.to_string()),
            });
        }

        report.not_synchronized = tables
            .keys()
            .filter(|name| !FIRST_PASS.contains(&name.as_str()) && !SECOND_PASS.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in &report.not_synchronized {
            tracing::warn!(table = %name, "table is not part of the sync order");
        }

        report
    }
}

async fn upsert(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    table: &Table,
    columns: &[PgColumn],
    primary_key: &str,
) -> Result<TableSync> {
    let statement = upsert_statement(name, columns, primary_key);
    let mut written = 0;
    let mut rejected = 0;

    for (position, row) in table.rows().iter().enumerate() {
        // one savepoint per row so a bad row doesn't abort the table
        let mut savepoint = tx.begin().await?;
        let query = row.iter().fold(sqlx::query(&statement), |query, value| query.bind(value.to_text()));

        match query.execute(&mut *savepoint).await {
            Ok(_) => {
                savepoint.commit().await?;
                written += 1;
            }
            Err(error) => {
                savepoint.rollback().await?;
                rejected += 1;
                if rejected <= 3 {
                    tracing::warn!(table = name, row = position, %error, "row rejected");
                }
            }
        }
    }

    if written == 0 {
        return Err(TienditaError::NothingWritten { table: name.to_string(), failed: rejected });
    }
    Ok(TableSync::Upserted { written, rejected })
}

async fn replace(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    table: &Table,
    columns: &[PgColumn],
) -> Result<TableSync> {
    sqlx::query("SET LOCAL session_replication_role = 'replica'").execute(&mut **tx).await?;
    sqlx::query(&format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", quote_ident(name)))
        .execute(&mut **tx)
        .await?;

    let conn: &mut PgConnection = &mut **tx;
    let mut copy = conn.copy_in_raw(&copy_statement(name, columns)).await?;
    copy.send(table.to_csv_bytes()?).await?;
    let rows = copy.finish().await?;

    sqlx::query("SET LOCAL session_replication_role = 'origin'").execute(&mut **tx).await?;
    Ok(TableSync::Replaced { rows })
}

/// Lazily opened connection kept for the whole session.
pub struct Connector {
    config: Option<Config>,
    db: Option<DB>,
}

impl Connector {
    pub fn new(config: Config) -> Self {
        Self { config: Some(config), db: None }
    }

    // never touches the network; edits only reach the csv files
    pub fn offline() -> Self {
        Self { config: None, db: None }
    }

    pub async fn get(&mut self) -> Option<&DB> {
        let config = self.config.as_ref()?;
        if self.db.as_ref().map_or(true, |db| db.pool.is_closed()) {
            match DB::new(config).await {
                Ok(db) => self.db = Some(db),
                Err(error) => {
                    tracing::error!(%error, "could not connect to postgres");
                    self.db = None;
                }
            }
        }
        self.db.as_ref()
    }

    pub async fn close(&mut self) {
        if let Some(db) = self.db.take() {
            db.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, udt: &str) -> PgColumn {
        PgColumn { name: name.into(), udt: udt.into() }
    }

    fn table(csv: &str) -> Table {
        Table::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn sync_order_puts_parents_first() {
        let order = FIRST_PASS.iter().chain(SECOND_PASS.iter()).collect::<Vec<_>>();
        let position = |name: &str| order.iter().position(|t| **t == name).unwrap();
        assert!(position("provincias") < position("localidades"));
        assert!(position("clientes") < position("facturas_encabezado"));
        assert!(position("facturas_encabezado") < position("facturas_detalle"));
        assert!(position("productos") < position("facturas_detalle"));
    }

    #[test]
    fn builds_upsert_with_casts() {
        let columns = vec![column("id_cliente", "int4"), column("nombre", "varchar")];
        assert_eq!(
            upsert_statement("clientes", &columns, "id_cliente"),
            "INSERT INTO \"clientes\" (\"id_cliente\", \"nombre\") VALUES (CAST($1 AS int4), CAST($2 AS varchar)) \
             ON CONFLICT (\"id_cliente\") DO UPDATE SET \"nombre\" = EXCLUDED.\"nombre\""
        );
    }

    #[test]
    fn upsert_of_key_only_table_does_nothing_on_conflict() {
        let statement = upsert_statement("rubros", &[column("id_rubro", "int4")], "id_rubro");
        assert!(statement.ends_with("ON CONFLICT (\"id_rubro\") DO NOTHING"));
    }

    #[test]
    fn odd_udt_names_cast_to_text() {
        assert_eq!(column("x", "weird type").cast_type(), "text");
        assert_eq!(column("x", "_int4").cast_type(), "_int4");
    }

    #[test]
    fn copy_lists_columns() {
        let statement = copy_statement("ventas", &[column("fecha", "date"), column("monto", "numeric")]);
        assert_eq!(
            statement,
            "COPY \"ventas\" (\"fecha\", \"monto\") FROM STDIN \
             WITH (FORMAT csv, HEADER true, DELIMITER ',', FORCE_NULL (\"fecha\", \"monto\"))"
        );
    }

    #[test]
    fn single_column_nulls_reach_copy_as_quoted_empty_fields() {
        let rubros = table("id_rubro,nombre\n1,Bebidas\n,Sin dato\n");
        let columns = [column("id_rubro", "int4")];
        let prepared = prepare_rows(&rubros, &columns).unwrap();
        let payload = String::from_utf8(prepared.to_csv_bytes().unwrap()).unwrap();
        assert_eq!(payload, "id_rubro\n1\n\"\"\n");
        assert!(copy_statement("rubros", &columns).ends_with("FORCE_NULL (\"id_rubro\"))"));
    }

    #[test]
    fn common_columns_follow_csv_order() {
        let csv = table("nombre,extra,id_cliente\nAna,x,1\n");
        let pg = vec![column("id_cliente", "int4"), column("nombre", "text")];
        let common = common_columns(&csv, &pg);
        assert_eq!(common.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["nombre", "id_cliente"]);
    }

    #[test]
    fn integral_floats_become_integers_for_int_columns() {
        let csv = table("id_cliente,saldo\n3.0,2.0\n");
        let prepared = prepare_rows(&csv, &[column("id_cliente", "int4"), column("saldo", "numeric")]).unwrap();
        assert_eq!(prepared.get(0, "id_cliente"), Some(&Value::Text("3".into())));
        assert_eq!(prepared.get(0, "saldo"), Some(&Value::Text("2.0".into())));
    }

    #[test]
    fn retains_rows_with_existing_parents() {
        let headers = table("id_factura,id_cliente,total_venta\n1,10,5.5\n2,11,3\n3,,1\n");
        let ids = ["10".to_string()].into_iter().collect::<HashSet<_>>();
        let (kept, omitted) = retain_existing(&headers, "cliente", &ids);
        assert_eq!(kept.len(), 1);
        assert_eq!(omitted, 2);
    }

    #[test]
    fn retain_without_parent_column_keeps_everything() {
        let ventas = table("fecha,monto\n2024-01-01,3\n");
        let (kept, omitted) = retain_existing(&ventas, "cliente", &HashSet::new());
        assert_eq!(kept, ventas);
        assert_eq!(omitted, 0);
    }

    #[test]
    fn report_counts_outcomes() {
        let report = SyncReport {
            outcomes: vec![
                TableOutcome { table: "provincias".into(), omitted: 0, result: Ok(TableSync::Replaced { rows: 24 }) },
                TableOutcome { table: "clientes".into(), omitted: 0, result: Err("tabla 'clientes' no encontrada".into()) },
                TableOutcome {
                    table: "facturas_encabezado".into(),
                    omitted: 2,
                    result: Ok(TableSync::Upserted { written: 8, rejected: 0 }),
                },
            ],
            not_synchronized: vec!["recursos".into()],
        };
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.attempted(), 3);
        let rendered = report.render();
        assert!(rendered.contains("2 filas omitidas"));
        assert!(rendered.contains("fuera del orden de sincronización: recursos"));
        assert!(rendered.ends_with("Tablas sincronizadas: 2/3\n"));
    }

    #[tokio::test]
    async fn offline_connector_never_connects() {
        let mut connector = Connector::offline();
        assert!(connector.get().await.is_none());
        connector.close().await;
    }
}
