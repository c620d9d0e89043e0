// src/menu.rs

use std::{
    collections::{BTreeMap, HashMap},
    io::{BufRead, Write},
    path::PathBuf,
};

use crate::{
    db::Connector,
    error::Result,
    keys::{clean_ids, detect_id_column, generate_ids, next_id, operator_view, reindex_ids, visible_columns},
    staging,
    table::{ColumnType, Condition, Table, Value},
};

const RULE: &str = "==================================================";

/// Line-oriented terminal. Reaching end of input reads as empty answers.
pub struct Console<R, W> {
    input: R,
    output: W,
    eof: bool,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output, eof: false }
    }

    pub fn say(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{}", message)?;
        Ok(())
    }

    pub fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            self.eof = true;
        }
        Ok(line.trim().to_string())
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(self.ask(prompt)?.to_lowercase() == "s")
    }

    pub fn at_eof(&self) -> bool {
        self.eof
    }
}

#[derive(Debug)]
pub struct EditOutcome {
    pub table: Table,
    pub changes: Vec<String>,
    pub exit: bool,
}

// operator typed default for a new column: numbers when they parse, text otherwise
fn parse_default(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        Value::Null
    } else if raw.contains('.') {
        raw.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(raw.to_string()))
    } else {
        raw.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(raw.to_string()))
    }
}

pub struct Session<R, W> {
    pub console: Console<R, W>,
    pub staging: PathBuf,
    pub tables: BTreeMap<String, Table>,
    pub connector: Connector,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(console: Console<R, W>, staging: PathBuf, tables: BTreeMap<String, Table>, connector: Connector) -> Self {
        Self { console, staging, tables, connector }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.check_connection().await?;

        loop {
            let names = self.tables.keys().cloned().collect::<Vec<_>>();
            self.console.say(&format!("\n{}\nMENÚ PRINCIPAL\n{}\nTablas:", RULE, RULE))?;
            for (i, name) in names.iter().enumerate() {
                self.console.say(&format!("  {}. {} ({} filas)", i + 1, name, self.tables[name].len()))?;
            }
            self.console.say("\nHerramientas:")?;
            self.console.say(&format!("  {}. Sincronizar todas las tablas con PostgreSQL", names.len() + 1))?;
            self.console.say(&format!("  {}. Probar conexión con PostgreSQL", names.len() + 2))?;
            self.console.say(&format!("  {}. Salir", names.len() + 3))?;

            let answer = self.console.ask("Seleccione una opción: ")?;
            if self.console.at_eof() && answer.is_empty() {
                break;
            }
            let Ok(choice) = answer.parse::<usize>() else {
                self.console.say("Ingrese un número válido")?;
                continue;
            };

            if (1..=names.len()).contains(&choice) {
                let name = names[choice - 1].clone();
                let outcome = self.edit_table(&name).await?;
                if !outcome.changes.is_empty() {
                    self.console.say(&format!("Tabla '{}' actualizada ({} cambios)", name, outcome.changes.len()))?;
                }
                self.tables.insert(name, outcome.table);
                if outcome.exit {
                    break;
                }
            } else if choice == names.len() + 1 {
                self.sync_all().await?;
            } else if choice == names.len() + 2 {
                self.check_connection().await?;
            } else if choice == names.len() + 3 {
                break;
            } else {
                self.console.say("Opción inválida")?;
            }
        }

        self.console.say("¡Hasta luego!")?;
        self.connector.close().await;
        Ok(())
    }

    pub async fn check_connection(&mut self) -> Result<()> {
        let Some(db) = self.connector.get().await else {
            self.console.say("PostgreSQL no disponible, los cambios solo se guardarán en csv")?;
            return Ok(());
        };
        match db.check().await {
            Ok(info) => {
                self.console.say(&format!("Versión de PostgreSQL: {}", info.version))?;
                self.console.say(&format!("Tablas disponibles: {:?}", info.tables))?;
            }
            Err(error) => self.console.say(&format!("Falló la prueba de conexión: {}", error))?,
        }
        Ok(())
    }

    pub async fn sync_all(&mut self) -> Result<()> {
        staging::save_tables(&self.staging, &self.tables)?;
        self.console.say("Sincronizando con PostgreSQL...")?;
        let Some(db) = self.connector.get().await else {
            self.console.say("No se pudo conectar a PostgreSQL")?;
            return Ok(());
        };
        let report = db.sync_all(&self.tables).await;
        self.console.say(&report.render())?;
        Ok(())
    }

    // write the csv, then push to postgres when it is reachable
    async fn save_and_sync(&mut self, name: &str, table: &Table) -> Result<()> {
        staging::save_table(&self.staging, name, table)?;
        self.console.say(&format!("Guardado: {} ({} filas)", name, table.len()))?;

        match self.connector.get().await {
            Some(db) => match db.sync_table(name, table).await {
                Ok(sync) => self.console.say(&format!("'{}' sincronizada: {}", name, sync))?,
                Err(error) => self.console.say(&format!("Error al sincronizar '{}': {}", name, error))?,
            },
            None => self.console.say("PostgreSQL no disponible, solo se guardó el csv")?,
        }
        Ok(())
    }

    fn choose_column(&mut self, view: &Table, prompt: &str) -> Result<Option<String>> {
        for (i, column) in view.columns().iter().enumerate() {
            self.console.say(&format!("  {}. {}", i + 1, column))?;
        }
        let answer = self.console.ask(prompt)?;
        match answer.parse::<usize>() {
            Ok(n) if (1..=view.width()).contains(&n) => Ok(Some(view.columns()[n - 1].clone())),
            Ok(_) => {
                self.console.say("Número de columna inválido")?;
                Ok(None)
            }
            Err(_) => {
                self.console.say("Ingrese un número válido")?;
                Ok(None)
            }
        }
    }

    fn print_menu(&mut self, name: &str, view: &Table, primary: Option<&str>, pending: usize) -> Result<()> {
        self.console.say(&format!("\n{}\nEDITOR DE TABLA: {}\n{}", RULE, name.to_uppercase(), RULE))?;
        self.console.say(&format!("Filas: {} | Columnas: {}", view.len(), view.width()))?;
        if let Some(primary) = primary {
            self.console.say(&format!("Id principal: {}", primary))?;
        }
        if pending > 0 {
            self.console.say(&format!("Cambios pendientes: {}", pending))?;
        }
        self.console.say(
            "\n--- VISUALIZACIÓN ---\n\
             1.  Ver primeras filas\n\
             2.  Información del dataset\n\
             3.  Estadísticas descriptivas\n\
             4.  Columnas disponibles\n\
             \n--- EDICIÓN ---\n\
             5.  Agregar columna\n\
             6.  Modificar columna\n\
             7.  Eliminar columna\n\
             8.  Agregar registro\n\
             9.  Eliminar registro\n\
             10. Filtrar filas\n\
             11. Buscar valores\n\
             12. Limpiar tabla (quitar duplicados, renumerar ids)\n\
             \n--- EXPORTACIÓN ---\n\
             13. Exportar a JSON\n\
             14. Exportar a Excel\n\
             15. Guardar cambios y volver\n\
             16. Volver sin guardar\n\
             17. Salir del programa",
        )
    }

    /// Interactive editor for one table. Works on a copy; every mutating action
    /// is saved to staging (and synchronized) right away.
    pub async fn edit_table(&mut self, name: &str) -> Result<EditOutcome> {
        let original = self.tables.get(name).cloned().unwrap_or_default();
        let mut working = original.clone();
        let mut changes: Vec<String> = Vec::new();
        let primary = detect_id_column(&working);
        if let Some(primary) = &primary {
            self.console.say(&format!("Columna id detectada: {}", primary))?;
        }

        loop {
            let view = operator_view(&working);
            self.print_menu(name, &view, primary.as_deref(), changes.len())?;
            let choice = self.console.ask("Seleccione una opción (1-17): ")?;
            if self.console.at_eof() && choice.is_empty() {
                return self.leave(name, &original, &changes, true).await;
            }

            match choice.as_str() {
                "1" => {
                    self.console.say(&format!("\nPrimeras 10 filas de '{}':", name))?;
                    self.console.say(&view.head(10).render())?;
                }
                "2" => {
                    self.console.say(&format!("Dimensiones: {} filas x {} columnas", view.len(), view.width()))?;
                    for info in view.info() {
                        self.console.say(&format!("  {:<24} {:<6} nulos: {}", info.name, info.kind, info.nulls))?;
                    }
                    if let Some(primary) = &primary {
                        self.console.say(&format!("Columna id: {}", primary))?;
                        self.console.say(&format!("Próximo id disponible: {}", next_id(&working, primary)))?;
                    }
                }
                "3" => {
                    for s in view.describe() {
                        let mean = s.mean.map(|m| format!("{:.2}", m)).unwrap_or_else(|| "-".into());
                        self.console.say(&format!(
                            "  {:<24} cant {:<6} únicos {:<6} mín {:<12} máx {:<12} media {}",
                            s.name,
                            s.count,
                            s.unique,
                            s.min.unwrap_or_default(),
                            s.max.unwrap_or_default(),
                            mean
                        ))?;
                    }
                }
                "4" => {
                    for (i, info) in view.info().iter().enumerate() {
                        self.console.say(&format!("  {}. {} ({})", i + 1, info.name, info.kind))?;
                    }
                    if let Some(primary) = primary.as_ref().filter(|p| view.column_index(p).is_none()) {
                        self.console.say(&format!("  {} (columna id oculta)", primary))?;
                    }
                }
                "5" => {
                    let column = self.console.ask("Nombre de la nueva columna: ")?;
                    if column.is_empty() || working.column_index(&column).is_some() {
                        self.console.say("Nombre inválido o la columna ya existe")?;
                        continue;
                    }
                    let default = parse_default(&self.console.ask("Valor por defecto (vacío para nulo): ")?);
                    working.add_column(&column, default)?;
                    changes.push(format!("Agregada columna '{}'", column));
                    self.save_and_sync(name, &working).await?;
                }
                "6" => {
                    let Some(column) = self.choose_column(&view, "Número de columna a modificar: ")? else { continue };
                    self.console.say(&format!("Modificando columna: {}\n1. Renombrar\n2. Cambiar tipo", column))?;
                    match self.console.ask("Seleccione: ")?.as_str() {
                        "1" => {
                            let renamed = self.console.ask("Nuevo nombre: ")?;
                            if let Err(error) = working.rename_column(&column, &renamed) {
                                self.console.say(&format!("Nombre inválido: {}", error))?;
                                continue;
                            }
                            changes.push(format!("Renombrada columna '{}' a '{}'", column, renamed));
                        }
                        "2" => {
                            let answer = self.console.ask("Nuevo tipo (int, float, str): ")?;
                            let Some(kind) = ColumnType::parse(&answer) else {
                                self.console.say("Tipo inválido")?;
                                continue;
                            };
                            working.cast_column(&column, kind)?;
                            changes.push(format!("Cambiado tipo de '{}' a {}", column, kind));
                        }
                        _ => {
                            self.console.say("Opción inválida")?;
                            continue;
                        }
                    }
                    self.save_and_sync(name, &working).await?;
                }
                "7" => {
                    let Some(column) = self.choose_column(&view, "Número de columna a eliminar: ")? else { continue };
                    if self.console.confirm(&format!("¿Eliminar columna '{}'? (s/n): ", column))? {
                        working.drop_column(&column)?;
                        changes.push(format!("Eliminada columna '{}'", column));
                        self.save_and_sync(name, &working).await?;
                    }
                }
                "8" => {
                    self.console.say(&format!("\nNUEVO REGISTRO PARA '{}'", name.to_uppercase()))?;
                    let mut record = HashMap::new();
                    generate_ids(&working, &mut record, &self.tables);

                    let visible = visible_columns(&working);
                    for column in &visible {
                        let kind = working.column_type(column).unwrap_or(ColumnType::Text);
                        let raw = self.console.ask(&format!("Valor para '{}' ({}): ", column, kind))?;
                        record.insert(column.clone(), kind.coerce_input(&raw));
                    }

                    let shown = visible
                        .iter()
                        .map(|c| format!("  {}: {}", c, record.get(c).map(|v| v.to_string()).unwrap_or_default()))
                        .collect::<Vec<_>>();
                    working.push_row(record);
                    if let Some(primary) = &primary {
                        reindex_ids(&mut working, primary);
                    }
                    changes.push("Agregado nuevo registro".to_string());
                    self.console.say(&format!("Registro agregado:\n{}", shown.join("\n")))?;
                    self.save_and_sync(name, &working).await?;
                }
                "9" => {
                    if working.is_empty() {
                        self.console.say("No hay filas para eliminar")?;
                        continue;
                    }
                    self.console.say(&view.head(10).render())?;
                    let answer = self.console.ask(&format!("Número de fila a eliminar (0-{}): ", working.len() - 1))?;
                    let Ok(position) = answer.parse::<usize>() else {
                        self.console.say("Ingrese un número válido")?;
                        continue;
                    };
                    if position >= working.len() {
                        self.console.say("Número de fila inválido")?;
                        continue;
                    }
                    for (column, value) in view.columns().iter().zip(&view.rows()[position]) {
                        self.console.say(&format!("  {}: {}", column, value))?;
                    }
                    if self.console.confirm("¿Eliminar este registro? (s/n): ")? {
                        working.remove_row(position)?;
                        if let Some(primary) = &primary {
                            reindex_ids(&mut working, primary);
                        }
                        changes.push(format!("Eliminado registro en posición {}", position));
                        self.save_and_sync(name, &working).await?;
                    } else {
                        self.console.say("Eliminación cancelada")?;
                    }
                }
                "10" => {
                    let Some(column) = self.choose_column(&view, "Número de columna a filtrar: ")? else { continue };
                    self.console.say("Ejemplos: 'texto', '>100', '<50', '==25', '>2023-01-01'")?;
                    let condition = self.console.ask("Condición: ")?;
                    if condition.is_empty() {
                        self.console.say("Filtro vacío")?;
                        continue;
                    }
                    let filtered = view.filter(&column, &Condition::parse(&condition))?;
                    self.console.say(&format!("Resultados del filtro ({} filas):", filtered.len()))?;
                    self.console.say(&filtered.render())?;
                }
                "11" => {
                    let term = self.console.ask("Término de búsqueda: ")?;
                    if term.is_empty() {
                        self.console.say("Término de búsqueda vacío")?;
                        continue;
                    }
                    let found = view.search(&term);
                    self.console.say(&format!("Resultados de búsqueda ({} filas):", found.len()))?;
                    if found.is_empty() {
                        self.console.say("No se encontraron coincidencias")?;
                    } else {
                        self.console.say(&found.render())?;
                    }
                }
                "12" => {
                    self.console.say("Se quitarán ids duplicados y las columnas id se convertirán a números y se renumerarán")?;
                    if self.console.confirm("¿Continuar? (s/n): ")? {
                        let removed = clean_ids(&mut working);
                        if removed > 0 {
                            changes.push(format!("Limpieza: eliminados {} registros duplicados", removed));
                        }
                        self.console.say(&format!("Tabla limpiada, {} duplicados eliminados", removed))?;
                        self.save_and_sync(name, &working).await?;
                    } else {
                        self.console.say("Limpieza cancelada")?;
                    }
                }
                "13" => {
                    let path = staging::export_json(&self.staging, name, &working)?;
                    self.console.say(&format!("Exportado a: {}", path.display()))?;
                }
                "14" => {
                    let path = staging::export_xlsx(&self.staging, name, &working)?;
                    self.console.say(&format!("Exportado a: {}", path.display()))?;
                }
                "15" => {
                    if !changes.is_empty() {
                        self.console.say(&format!("Guardando {} cambios...", changes.len()))?;
                        staging::record_changes(&self.staging, name, &changes)?;
                    }
                    return Ok(EditOutcome { table: working, changes, exit: false });
                }
                "16" => {
                    if !changes.is_empty() && !self.console.confirm("Hay cambios sin guardar. ¿Volver de todos modos? (s/n): ")? {
                        continue;
                    }
                    return self.leave(name, &original, &changes, false).await;
                }
                "17" => {
                    if !changes.is_empty() && !self.console.confirm("Hay cambios sin guardar. ¿Salir de todos modos? (s/n): ")? {
                        continue;
                    }
                    return self.leave(name, &original, &changes, true).await;
                }
                _ => self.console.say("Opción inválida, elija 1-17")?,
            }
        }
    }

    // discard the session: edits already written to staging are reverted
    async fn leave(&mut self, name: &str, original: &Table, changes: &[String], exit: bool) -> Result<EditOutcome> {
        if !changes.is_empty() {
            self.save_and_sync(name, original).await?;
        }
        Ok(EditOutcome { table: original.clone(), changes: Vec::new(), exit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, io::Cursor, path::Path};

    fn session(dir: &Path, script: &str) -> Session<Cursor<Vec<u8>>, Vec<u8>> {
        let mut tables = BTreeMap::new();
        tables.insert(
            "clientes".to_string(),
            Table::from_reader("id_cliente,nombre,ciudad,id_localidad\n1,Ana,Salta,2\n2,Leo,Tartagal,2\n".as_bytes())
                .unwrap(),
        );
        tables.insert(
            "localidades".to_string(),
            Table::from_reader("id_localidad,nombre\n2,Salta\n5,Cafayate\n".as_bytes()).unwrap(),
        );
        let console = Console::new(Cursor::new(script.as_bytes().to_vec()), Vec::new());
        Session::new(console, dir.to_path_buf(), tables, Connector::offline())
    }

    fn output(session: Session<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8(session.console.output).unwrap()
    }

    #[test]
    fn default_values_are_typed() {
        assert_eq!(parse_default("3"), Value::Int(3));
        assert_eq!(parse_default("1.21"), Value::Float(1.21));
        assert_eq!(parse_default("n/a"), Value::Text("n/a".into()));
        assert_eq!(parse_default(""), Value::Null);
    }

    #[tokio::test]
    async fn adds_record_with_generated_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "8\nSol\nCafayate\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert!(!outcome.exit);
        assert_eq!(outcome.changes, vec!["Agregado nuevo registro".to_string()]);

        let clientes = &outcome.table;
        assert_eq!(clientes.len(), 3);
        assert_eq!(clientes.get(2, "id_cliente"), Some(&Value::Int(3)));
        assert_eq!(clientes.get(2, "id_localidad"), Some(&Value::Int(2)));
        assert_eq!(clientes.get(2, "ciudad"), Some(&Value::Text("Cafayate".into())));

        let staged = fs::read_to_string(dir.path().join("clientes.csv")).unwrap();
        assert!(staged.ends_with("3,Sol,Cafayate,2\n"));
        let log = fs::read_to_string(dir.path().join("log_cambios.txt")).unwrap();
        assert!(log.contains("   - Agregado nuevo registro"));
        assert!(output(session).contains("PostgreSQL no disponible, solo se guardó el csv"));
    }

    #[tokio::test]
    async fn deletes_row_and_renumbers() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "9\n0\ns\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.get(0, "nombre"), Some(&Value::Text("Leo".into())));
        assert_eq!(outcome.table.get(0, "id_cliente"), Some(&Value::Int(1)));
    }

    #[tokio::test]
    async fn drops_column_only_after_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        // first answer declines, second confirms
        let mut session = session(dir.path(), "7\n2\nn\n7\n2\ns\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert_eq!(outcome.changes, vec!["Eliminada columna 'ciudad'".to_string()]);
        assert_eq!(outcome.table.width(), 3);
        assert!(outcome.table.column_index("ciudad").is_none());

        let staged = fs::read_to_string(dir.path().join("clientes.csv")).unwrap();
        assert!(staged.starts_with("id_cliente,nombre,id_localidad\n"));
        let log = fs::read_to_string(dir.path().join("log_cambios.txt")).unwrap();
        assert!(log.contains("   - Eliminada columna 'ciudad'"));
    }

    #[tokio::test]
    async fn cleans_duplicates_and_logs_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "12\ns\n15\n");
        session.tables.insert(
            "clientes".to_string(),
            Table::from_reader("id_cliente,nombre\n1,Ana\n1,Ana bis\n3,Leo\n".as_bytes()).unwrap(),
        );

        let outcome = session.edit_table("clientes").await.unwrap();
        assert_eq!(outcome.changes, vec!["Limpieza: eliminados 1 registros duplicados".to_string()]);
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.table.get(1, "id_cliente"), Some(&Value::Int(2)));
        assert_eq!(outcome.table.get(1, "nombre"), Some(&Value::Text("Leo".into())));

        let log = fs::read_to_string(dir.path().join("log_cambios.txt")).unwrap();
        assert!(log.contains("   - Limpieza: eliminados 1 registros duplicados"));
        assert!(output(session).contains("Tabla limpiada, 1 duplicados eliminados"));
    }

    #[tokio::test]
    async fn return_without_saving_restores_staging() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "5\nemail\n\n16\ns\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.table.width(), 4);
        let staged = fs::read_to_string(dir.path().join("clientes.csv")).unwrap();
        assert!(!staged.contains("email"));
        assert!(!dir.path().join("log_cambios.txt").exists());
    }

    #[tokio::test]
    async fn exit_with_pending_changes_can_be_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "5\nemail\n\n17\nn\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert!(!outcome.exit);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.table.width(), 5);
        let staged = fs::read_to_string(dir.path().join("clientes.csv")).unwrap();
        assert!(staged.contains("email"));
        assert!(output(session).contains("Hay cambios sin guardar. ¿Salir de todos modos? (s/n): "));
    }

    #[tokio::test]
    async fn exit_with_pending_changes_discards_them() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "5\nemail\n\n17\ns\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert!(outcome.exit);
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.table.width(), 4);
        let staged = fs::read_to_string(dir.path().join("clientes.csv")).unwrap();
        assert!(!staged.contains("email"));
        assert!(!dir.path().join("log_cambios.txt").exists());
    }

    #[tokio::test]
    async fn rename_and_retype_column() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "6\n1\n1\nnombre_cli\n6\n1\n2\nint\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert_eq!(outcome.table.columns()[1], "nombre_cli");
        assert_eq!(outcome.table.get(0, "nombre_cli"), Some(&Value::Int(0)));
        assert_eq!(outcome.changes.len(), 2);
    }

    #[tokio::test]
    async fn filter_and_search_do_not_modify() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "10\n2\ntartagal\n11\nana\n15\n");

        let outcome = session.edit_table("clientes").await.unwrap();
        assert!(outcome.changes.is_empty());
        let text = output(session);
        assert!(text.contains("Resultados del filtro (1 filas):"));
        assert!(text.contains("Resultados de búsqueda (1 filas):"));
        assert!(!dir.path().join("clientes.csv").exists());
    }

    #[tokio::test]
    async fn exports_from_editor() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "13\n14\n15\n");
        session.edit_table("localidades").await.unwrap();
        assert!(dir.path().join("localidades.json").exists());
        assert!(dir.path().join("localidades.xlsx").exists());
    }

    #[tokio::test]
    async fn main_menu_edits_then_exits() {
        let dir = tempfile::tempdir().unwrap();
        // clientes -> add column -> save; then exit (2 tables + 3)
        let mut session = session(dir.path(), "1\n5\nactivo\n1\n15\n5\n");
        session.run().await.unwrap();
        assert_eq!(session.tables["clientes"].get(0, "activo"), Some(&Value::Int(1)));
        let text = output(session);
        assert!(text.contains("1. clientes (2 filas)"));
        assert!(text.ends_with("¡Hasta luego!\n"));
    }

    #[tokio::test]
    async fn offline_tools_still_save_every_table() {
        let dir = tempfile::tempdir().unwrap();
        // sync all, test connection, exit
        let mut session = session(dir.path(), "3\n4\n5\n");
        session.run().await.unwrap();

        assert!(dir.path().join("clientes.csv").exists());
        assert!(dir.path().join("localidades.csv").exists());
        let text = output(session);
        assert!(text.contains("Sincronizando con PostgreSQL...\nNo se pudo conectar a PostgreSQL\n"));
        // once on start and once more from the menu
        assert_eq!(text.matches("PostgreSQL no disponible, los cambios solo se guardarán en csv").count(), 2);
        assert!(text.ends_with("¡Hasta luego!\n"));
    }

    #[tokio::test]
    async fn end_of_input_leaves_the_menu() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(dir.path(), "abc\n");
        session.run().await.unwrap();
        assert!(output(session).contains("Ingrese un número válido"));
    }
}
