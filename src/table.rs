// src/table.rs

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt,
    fs::File,
    io::{Read, Write},
    path::Path,
};

use rust_xlsxwriter::Workbook;
use serde::Serialize;

use crate::error::{Result, TienditaError};

/// A single cell. Empty CSV cells load as `Null` and are written back empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::Int(int);
        }
        // "nan"/"inf" stay text, only plain decimals count as floats
        if trimmed.chars().any(|c| c.is_ascii_digit())
            && trimmed.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        {
            if let Ok(float) = trimmed.parse::<f64>() {
                return Value::Float(float);
            }
        }
        Value::Text(raw.to_string())
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) => Some(*float),
            Value::Text(text) => text.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(int) => Some(*int),
            other => other.as_f64().map(|f| f.trunc() as i64),
        }
    }

    // text used for csv, sql binds and substring matching
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(int) => write!(f, "{}", int),
            Value::Float(float) if float.is_finite() && float.fract() == 0.0 => write!(f, "{:.1}", float),
            Value::Float(float) => write!(f, "{}", float),
            Value::Text(text) => write!(f, "{}", text),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    Text,
    Empty,
}

impl ColumnType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "str" => Some(ColumnType::Text),
            _ => None,
        }
    }

    // convert operator input to this column's type, keeping text when it doesn't fit
    pub fn coerce_input(&self, raw: &str) -> Value {
        let raw = raw.trim();
        if raw.is_empty() {
            return Value::Null;
        }
        match self {
            ColumnType::Int => raw.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(raw.to_string())),
            ColumnType::Float => raw.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(raw.to_string())),
            _ => Value::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Text => "str",
            ColumnType::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// Filter condition typed by the operator: `>100`, `==25`, `>2023-01-01` or free text.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Compare(Comparison, String),
    Contains(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Ge,
    Le,
    Eq,
    Ne,
    Gt,
    Lt,
}

impl Condition {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let operators = [
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
        ];
        for (symbol, comparison) in operators {
            if let Some(rest) = raw.strip_prefix(symbol) {
                let operand = rest.trim().trim_matches(|c| c == '\'' || c == '"');
                if !operand.is_empty() {
                    return Condition::Compare(comparison, operand.to_string());
                }
            }
        }
        Condition::Contains(raw.to_string())
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Contains(term) => contains_ignore_case(value, term),
            Condition::Compare(comparison, operand) => {
                if value.is_null() {
                    return false;
                }
                let ordering = match (value.as_f64(), operand.parse::<f64>().ok()) {
                    (Some(left), Some(right)) => left.partial_cmp(&right),
                    _ => Some(value.to_string().as_str().cmp(operand.as_str())),
                };
                let Some(ordering) = ordering else { return false };
                match comparison {
                    Comparison::Ge => ordering != Ordering::Less,
                    Comparison::Le => ordering != Ordering::Greater,
                    Comparison::Eq => ordering == Ordering::Equal,
                    Comparison::Ne => ordering != Ordering::Equal,
                    Comparison::Gt => ordering == Ordering::Greater,
                    Comparison::Lt => ordering == Ordering::Less,
                }
            }
        }
    }
}

fn contains_ignore_case(value: &Value, term: &str) -> bool {
    let term = term.to_lowercase();
    value.to_text().map(|text| text.to_lowercase().contains(&term)).unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnType,
    pub nulls: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub count: usize,
    pub unique: usize,
    pub min: Option<String>,
    pub max: Option<String>,
    pub mean: Option<f64>,
}

/// Column-ordered rows loaded from one staged CSV file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
        let columns = reader.headers()?.iter().map(|h| h.trim().to_string()).collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(Value::parse).collect());
        }
        Ok(Self::from_rows(columns, rows))
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|value| value.to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        self.to_writer(File::create(path)?)
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.to_writer(&mut buffer)?;
        Ok(buffer)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| TienditaError::UnknownColumn(name.to_string()))
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>> {
        let index = self.require_column(name)?;
        Ok(self.rows.iter().map(|row| &row[index]).collect())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|values| &values[index])
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column_index(name).map(|index| self.column_type_at(index))
    }

    fn column_type_at(&self, index: usize) -> ColumnType {
        let mut kind = ColumnType::Empty;
        for row in &self.rows {
            kind = match (&row[index], kind) {
                (value, _) if value.is_null() => kind,
                (Value::Text(_), _) | (_, ColumnType::Text) => return ColumnType::Text,
                (Value::Int(_), ColumnType::Empty | ColumnType::Int) => ColumnType::Int,
                _ => ColumnType::Float,
            };
        }
        kind
    }

    /// Replace a whole column's values, one per row.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<()> {
        let index = self.require_column(name)?;
        if values.len() != self.rows.len() {
            return Err(TienditaError::InvalidInput(format!(
                "la columna '{}' necesita {} valores, recibió {}",
                name,
                self.rows.len(),
                values.len()
            )));
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[index] = value;
        }
        Ok(())
    }

    pub fn head(&self, n: usize) -> Table {
        Table { columns: self.columns.clone(), rows: self.rows.iter().take(n).cloned().collect() }
    }

    pub fn project(&self, columns: &[String]) -> Result<Table> {
        let indexes = columns.iter().map(|c| self.require_column(c)).collect::<Result<Vec<_>>>()?;
        let rows = self.rows.iter().map(|row| indexes.iter().map(|&i| row[i].clone()).collect()).collect();
        Ok(Table { columns: columns.to_vec(), rows })
    }

    pub fn add_column(&mut self, name: &str, default: Value) -> Result<()> {
        if name.trim().is_empty() {
            return Err(TienditaError::InvalidInput("nombre de columna vacío".into()));
        }
        if self.column_index(name).is_some() {
            return Err(TienditaError::DuplicateColumn(name.to_string()));
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.clone());
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let index = self.require_column(from)?;
        if to.trim().is_empty() {
            return Err(TienditaError::InvalidInput("nombre de columna vacío".into()));
        }
        if self.column_index(to).is_some() {
            return Err(TienditaError::DuplicateColumn(to.to_string()));
        }
        self.columns[index] = to.to_string();
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let index = self.require_column(name)?;
        self.columns.remove(index);
        for row in &mut self.rows {
            row.remove(index);
        }
        Ok(())
    }

    /// Numeric casts coerce unconvertible cells to zero; text casts keep the rendering.
    pub fn cast_column(&mut self, name: &str, kind: ColumnType) -> Result<()> {
        let index = self.require_column(name)?;
        for row in &mut self.rows {
            let cell = &row[index];
            row[index] = match kind {
                ColumnType::Int => Value::Int(cell.as_f64().map(|f| f.trunc() as i64).unwrap_or(0)),
                ColumnType::Float => Value::Float(cell.as_f64().unwrap_or(0.0)),
                ColumnType::Text => Value::Text(cell.to_string()),
                ColumnType::Empty => return Err(TienditaError::InvalidInput("no se puede convertir a vacío".into())),
            };
        }
        Ok(())
    }

    /// Columns missing from `record` are filled with `Null`; unknown keys are ignored.
    pub fn push_row(&mut self, mut record: HashMap<String, Value>) {
        let row = self.columns.iter().map(|c| record.remove(c).unwrap_or(Value::Null)).collect();
        self.rows.push(row);
    }

    pub fn remove_row(&mut self, index: usize) -> Result<Vec<Value>> {
        if index >= self.rows.len() {
            return Err(TienditaError::RowOutOfRange { index, len: self.rows.len() });
        }
        Ok(self.rows.remove(index))
    }

    pub fn retain_rows<F: FnMut(&[Value]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|row| keep(row));
    }

    pub fn filter(&self, column: &str, condition: &Condition) -> Result<Table> {
        let index = self.require_column(column)?;
        let rows = self.rows.iter().filter(|row| condition.matches(&row[index])).cloned().collect();
        Ok(Table { columns: self.columns.clone(), rows })
    }

    pub fn search(&self, term: &str) -> Table {
        let rows = self
            .rows
            .iter()
            .filter(|row| row.iter().any(|value| contains_ignore_case(value, term)))
            .cloned()
            .collect();
        Table { columns: self.columns.clone(), rows }
    }

    /// Drop rows repeating an earlier value of `column`; returns how many were removed.
    pub fn dedup_by(&mut self, column: &str) -> Result<usize> {
        let index = self.require_column(column)?;
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row[index].to_string()));
        Ok(before - self.rows.len())
    }

    pub fn info(&self) -> Vec<ColumnInfo> {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, name)| ColumnInfo {
                name: name.clone(),
                kind: self.column_type_at(index),
                nulls: self.rows.iter().filter(|row| row[index].is_null()).count(),
            })
            .collect()
    }

    pub fn describe(&self) -> Vec<ColumnSummary> {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let present = self.rows.iter().map(|row| &row[index]).filter(|v| !v.is_null()).collect::<Vec<_>>();
                let unique = present.iter().map(|v| v.to_string()).collect::<HashSet<_>>().len();
                let numeric = matches!(self.column_type_at(index), ColumnType::Int | ColumnType::Float);
                let (min, max, mean) = if numeric {
                    let numbers = present.iter().filter_map(|v| v.as_f64()).collect::<Vec<_>>();
                    let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                    (Some(format_number(min)), Some(format_number(max)), Some(mean))
                } else {
                    let mut texts = present.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                    texts.sort();
                    (texts.first().cloned(), texts.last().cloned(), None)
                };
                ColumnSummary { name: name.clone(), count: present.len(), unique, min, max, mean }
            })
            .collect()
    }

    /// Fixed-width text grid with a leading row position column.
    pub fn render(&self) -> String {
        let mut widths = self.columns.iter().map(|c| c.chars().count()).collect::<Vec<_>>();
        let cells = self
            .rows
            .iter()
            .map(|row| row.iter().map(|v| if v.is_null() { "NaN".to_string() } else { v.to_string() }).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }
        let index_width = self.rows.len().saturating_sub(1).to_string().len();

        let mut out = String::new();
        out.push_str(&" ".repeat(index_width));
        for (column, width) in self.columns.iter().zip(&widths) {
            out.push_str(&format!("  {:>width$}", column, width = *width));
        }
        out.push('\n');
        for (position, row) in cells.iter().enumerate() {
            out.push_str(&format!("{:<width$}", position, width = index_width));
            for (cell, width) in row.iter().zip(&widths) {
                out.push_str(&format!("  {:>width$}", cell, width = *width));
            }
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let records = self
            .rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null)))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(records)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &self.to_json())?;
        Ok(())
    }

    pub fn write_xlsx(&self, path: &Path, sheet: &str) -> Result<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet)?;
        for (col, name) in self.columns.iter().enumerate() {
            worksheet.write_string(0, col as u16, name)?;
        }
        for (row_index, row) in self.rows.iter().enumerate() {
            let row_number = row_index as u32 + 1;
            for (col, value) in row.iter().enumerate() {
                match value {
                    Value::Null => {}
                    Value::Int(int) => {
                        worksheet.write_number(row_number, col as u16, *int as f64)?;
                    }
                    Value::Float(float) => {
                        worksheet.write_number(row_number, col as u16, *float)?;
                    }
                    Value::Text(text) => {
                        worksheet.write_string(row_number, col as u16, text)?;
                    }
                }
            }
        }
        workbook.save(path)?;
        Ok(())
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.4}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_reader("id_producto,descripcion,precio\n1,Yerba,1500.5\n2,Azucar,900\n3,Yerba Suave,\n".as_bytes())
            .unwrap()
    }

    #[test]
    fn parses_cells_by_shape() {
        assert_eq!(Value::parse("12"), Value::Int(12));
        assert_eq!(Value::parse("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse(""), Value::Null);
        assert_eq!(Value::parse("2023-01-05"), Value::Text("2023-01-05".into()));
        assert_eq!(Value::parse("nan"), Value::Text("nan".into()));
    }

    #[test]
    fn infers_column_types() {
        let table = sample();
        assert_eq!(table.column_type("id_producto"), Some(ColumnType::Int));
        assert_eq!(table.column_type("descripcion"), Some(ColumnType::Text));
        assert_eq!(table.column_type("precio"), Some(ColumnType::Float));
        assert_eq!(table.info()[2].nulls, 1);
    }

    #[test]
    fn csv_keeps_empty_cells_empty() {
        let bytes = sample().to_csv_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().last(), Some("3,Yerba Suave,"));
        assert!(text.contains("1,Yerba,1500.5"));
    }

    #[test]
    fn column_edits() {
        let mut table = sample();
        table.add_column("stock", Value::Int(0)).unwrap();
        assert!(matches!(table.add_column("stock", Value::Null), Err(TienditaError::DuplicateColumn(_))));
        table.rename_column("stock", "existencias").unwrap();
        table.cast_column("existencias", ColumnType::Float).unwrap();
        assert_eq!(table.get(0, "existencias"), Some(&Value::Float(0.0)));
        table.drop_column("existencias").unwrap();
        assert_eq!(table.width(), 3);
    }

    #[test]
    fn cast_to_int_fills_unconvertible_with_zero() {
        let mut table = sample();
        table.cast_column("descripcion", ColumnType::Int).unwrap();
        assert_eq!(table.get(1, "descripcion"), Some(&Value::Int(0)));
        table.cast_column("precio", ColumnType::Int).unwrap();
        assert_eq!(table.get(0, "precio"), Some(&Value::Int(1500)));
    }

    #[test]
    fn filters_numbers_and_text() {
        let table = sample();
        let expensive = table.filter("precio", &Condition::parse(">1000")).unwrap();
        assert_eq!(expensive.len(), 1);
        let yerba = table.filter("descripcion", &Condition::parse("yerba")).unwrap();
        assert_eq!(yerba.len(), 2);
        assert_eq!(table.filter("id_producto", &Condition::parse("!=2")).unwrap().len(), 2);
    }

    #[test]
    fn filters_dates_lexicographically() {
        let table = Table::from_reader("fecha\n2022-12-31\n2023-02-01\n".as_bytes()).unwrap();
        let recent = table.filter("fecha", &Condition::parse(">2023-01-01")).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn search_spans_all_columns() {
        let table = sample();
        assert_eq!(table.search("AZU").len(), 1);
        assert_eq!(table.search("1500").len(), 1);
        assert!(table.search("cafe").is_empty());
    }

    #[test]
    fn dedup_keeps_first() {
        let mut table = Table::from_reader("id,nombre\n1,a\n1,b\n2,c\n".as_bytes()).unwrap();
        assert_eq!(table.dedup_by("id").unwrap(), 1);
        assert_eq!(table.get(0, "nombre"), Some(&Value::Text("a".into())));
    }

    #[test]
    fn push_and_remove_rows() {
        let mut table = sample();
        let mut record = HashMap::new();
        record.insert("descripcion".to_string(), Value::Text("Cafe".into()));
        table.push_row(record);
        assert_eq!(table.len(), 4);
        assert_eq!(table.get(3, "precio"), Some(&Value::Null));
        assert!(matches!(table.remove_row(9), Err(TienditaError::RowOutOfRange { index: 9, len: 4 })));
        table.remove_row(0).unwrap();
        assert_eq!(table.get(0, "descripcion"), Some(&Value::Text("Azucar".into())));
    }

    #[test]
    fn describe_numeric_column() {
        let summary = sample().describe();
        assert_eq!(summary[0].count, 3);
        assert_eq!(summary[0].mean, Some(2.0));
        assert_eq!(summary[0].max.as_deref(), Some("3"));
        assert_eq!(summary[1].min.as_deref(), Some("Azucar"));
    }

    #[test]
    fn json_records() {
        let json = sample().head(1).to_json();
        assert_eq!(json[0]["descripcion"], "Yerba");
        assert_eq!(json[0]["id_producto"], 1);
    }

    #[test]
    fn render_has_header_and_index() {
        let rendered = sample().head(2).render();
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("descripcion"));
        assert!(lines[2].starts_with('1'));
    }
}
