// src/dashboard/dataset.rs

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::error::{Result, TienditaError};

pub const DATASET_FILES: [&str; 11] = [
    "clientes",
    "condicion_iva",
    "facturas_detalle",
    "facturas_encabezado",
    "localidades",
    "productos",
    "proveedores",
    "provincias",
    "rubros",
    "sucursales",
    "ventas",
];

// ids may have been written back as floats ("3.0") by the editor
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i64>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| raw.trim().parse::<f64>().ok()).filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|raw| raw.trim().parse::<f64>().ok()).unwrap_or(0.0))
}

#[derive(Clone, Debug, Deserialize)]
pub struct Client {
    #[serde(alias = "id_cliente", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "nombre", default)]
    pub name: String,
    #[serde(alias = "apellido", default)]
    pub surname: String,
    #[serde(alias = "id_condicion_iva", deserialize_with = "de_id", default)]
    pub iva_condition_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IvaCondition {
    #[serde(alias = "id_condicion_iva", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "descripcion", default)]
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Branch {
    #[serde(alias = "id_sucursal", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "nombre", default)]
    pub name: String,
    #[serde(alias = "id_localidad", deserialize_with = "de_id", default)]
    pub locality_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Locality {
    #[serde(alias = "id_localidad", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "nombre", default)]
    pub name: String,
    #[serde(alias = "id_provincia", deserialize_with = "de_id", default)]
    pub province_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Province {
    #[serde(alias = "id_provincia", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "nombre", default)]
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Product {
    #[serde(alias = "id_producto", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "descripcion", default)]
    pub description: String,
    #[serde(alias = "precio", deserialize_with = "de_amount", default)]
    pub price: f64,
    #[serde(alias = "id_rubro", deserialize_with = "de_id", default)]
    pub category_id: Option<i64>,
    #[serde(alias = "id_proveedor", deserialize_with = "de_id", default)]
    pub supplier_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Category {
    #[serde(alias = "id_rubro", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "descripcion", default)]
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Supplier {
    #[serde(alias = "id_proveedor", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "nombre", default)]
    pub name: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InvoiceHeader {
    #[serde(alias = "id_factura", deserialize_with = "de_id", default)]
    pub id: Option<i64>,
    #[serde(alias = "id_cliente", deserialize_with = "de_id", default)]
    pub client_id: Option<i64>,
    #[serde(alias = "id_sucursal", deserialize_with = "de_id", default)]
    pub branch_id: Option<i64>,
    #[serde(alias = "fecha", default)]
    pub date: String,
    #[serde(alias = "total_venta", deserialize_with = "de_amount", default)]
    pub total: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InvoiceLine {
    #[serde(alias = "id_factura", deserialize_with = "de_id", default)]
    pub invoice_id: Option<i64>,
    #[serde(alias = "id_producto", deserialize_with = "de_id", default)]
    pub product_id: Option<i64>,
    #[serde(alias = "cantidad", deserialize_with = "de_amount", default)]
    pub quantity: f64,
    #[serde(alias = "subtotal_linea", deserialize_with = "de_amount", default)]
    pub subtotal: f64,
}

/// One invoice header joined with its client, branch and location.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvoiceFact {
    pub invoice_id: i64,
    pub client_id: i64,
    pub client_name: String,
    pub client_surname: String,
    pub iva_condition: String,
    pub branch: String,
    pub branch_locality: String,
    pub province: String,
    pub date: NaiveDateTime,
    pub total: f64,
}

/// One invoice line joined with product, category, supplier and its invoice.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LineFact {
    pub invoice_id: i64,
    pub product_id: i64,
    pub product: String,
    pub price: f64,
    pub category: String,
    pub supplier: String,
    pub quantity: f64,
    pub subtotal: f64,
    pub date: NaiveDateTime,
    pub branch: String,
    pub province: String,
    pub client_name: String,
    pub client_surname: String,
}

#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub invoices: Vec<InvoiceFact>,
    pub lines: Vec<LineFact>,
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn parse_records<T: DeserializeOwned>(name: &str, bytes: &[u8]) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::Headers).from_reader(bytes);
    let records = reader.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    if records.is_empty() {
        return Err(TienditaError::MissingDataset(name.to_string()));
    }
    Ok(records)
}

// first row wins when an id repeats
fn index_by<T>(rows: Vec<T>, id: impl Fn(&T) -> Option<i64>) -> HashMap<i64, T> {
    let mut index = HashMap::new();
    for row in rows {
        if let Some(key) = id(&row) {
            index.entry(key).or_insert(row);
        }
    }
    index
}

async fn read_file(path: PathBuf, name: &'static str) -> Result<(&'static str, Vec<u8>)> {
    let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
        .await
        .map_err(std::io::Error::other)?
        .map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => TienditaError::MissingDataset(name.to_string()),
            _ => TienditaError::Io(error),
        })?;
    Ok((name, bytes))
}

impl Dataset {
    /// Read the eleven exports from `dir` and join them.
    pub async fn load(dir: &Path) -> Result<Self> {
        let files = try_join_all(DATASET_FILES.iter().map(|&name| read_file(dir.join(format!("{}.csv", name)), name))).await?;
        let files = files.into_iter().collect::<HashMap<_, _>>();
        let file = |name: &str| files.get(name).map(Vec::as_slice).unwrap_or_default();

        // ventas is not joined, but an empty export still means a broken dump
        parse_records::<HashMap<String, String>>("ventas", file("ventas"))?;

        let dataset = Self::join(
            parse_records("clientes", file("clientes"))?,
            parse_records("condicion_iva", file("condicion_iva"))?,
            parse_records("sucursales", file("sucursales"))?,
            parse_records("localidades", file("localidades"))?,
            parse_records("provincias", file("provincias"))?,
            parse_records("productos", file("productos"))?,
            parse_records("rubros", file("rubros"))?,
            parse_records("proveedores", file("proveedores"))?,
            parse_records("facturas_encabezado", file("facturas_encabezado"))?,
            parse_records("facturas_detalle", file("facturas_detalle"))?,
        );

        tracing::info!(invoices = dataset.invoices.len(), lines = dataset.lines.len(), dir = %dir.display(), "dashboard dataset loaded");
        Ok(dataset)
    }

    /// Inner joins: rows pointing at a missing parent are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn join(
        clients: Vec<Client>,
        iva_conditions: Vec<IvaCondition>,
        branches: Vec<Branch>,
        localities: Vec<Locality>,
        provinces: Vec<Province>,
        products: Vec<Product>,
        categories: Vec<Category>,
        suppliers: Vec<Supplier>,
        headers: Vec<InvoiceHeader>,
        lines: Vec<InvoiceLine>,
    ) -> Self {
        let clients = index_by(clients, |c| c.id);
        let iva_conditions = index_by(iva_conditions, |c| c.id);
        let branches = index_by(branches, |b| b.id);
        let localities = index_by(localities, |l| l.id);
        let provinces = index_by(provinces, |p| p.id);
        let products = index_by(products, |p| p.id);
        let categories = index_by(categories, |c| c.id);
        let suppliers = index_by(suppliers, |s| s.id);

        let header_count = headers.len();
        let invoices = headers
            .into_iter()
            .filter_map(|header| {
                let client = clients.get(&header.client_id?)?;
                let iva = iva_conditions.get(&client.iva_condition_id?)?;
                let branch = branches.get(&header.branch_id?)?;
                let locality = localities.get(&branch.locality_id?)?;
                let province = provinces.get(&locality.province_id?)?;
                Some(InvoiceFact {
                    invoice_id: header.id?,
                    client_id: header.client_id?,
                    client_name: client.name.clone(),
                    client_surname: client.surname.clone(),
                    iva_condition: iva.description.clone(),
                    branch: branch.name.clone(),
                    branch_locality: locality.name.clone(),
                    province: province.name.clone(),
                    date: parse_datetime(&header.date)?,
                    total: header.total,
                })
            })
            .collect::<Vec<_>>();
        if invoices.len() < header_count {
            tracing::warn!(dropped = header_count - invoices.len(), "invoices without matching client, branch or date");
        }

        let by_invoice = invoices.iter().map(|i| (i.invoice_id, i)).collect::<HashMap<_, _>>();
        let line_count = lines.len();
        let lines = lines
            .into_iter()
            .filter_map(|line| {
                let product = products.get(&line.product_id?)?;
                let category = categories.get(&product.category_id?)?;
                let supplier = suppliers.get(&product.supplier_id?)?;
                let invoice = by_invoice.get(&line.invoice_id?)?;
                Some(LineFact {
                    invoice_id: invoice.invoice_id,
                    product_id: line.product_id?,
                    product: product.description.clone(),
                    price: product.price,
                    category: category.description.clone(),
                    supplier: supplier.name.clone(),
                    quantity: line.quantity,
                    subtotal: line.subtotal,
                    date: invoice.date,
                    branch: invoice.branch.clone(),
                    province: invoice.province.clone(),
                    client_name: invoice.client_name.clone(),
                    client_surname: invoice.client_surname.clone(),
                })
            })
            .collect::<Vec<_>>();
        if lines.len() < line_count {
            tracing::warn!(dropped = line_count - lines.len(), "invoice lines without matching product or invoice");
        }

        Self { invoices, lines }
    }

    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.invoices.iter().map(|i| i.date.date()).min()?;
        let max = self.invoices.iter().map(|i| i.date.date()).max()?;
        Some((min, max))
    }

    pub fn branches(&self) -> BTreeSet<String> {
        self.invoices.iter().map(|i| i.branch.clone()).collect()
    }

    pub fn provinces(&self) -> BTreeSet<String> {
        self.invoices.iter().map(|i| i.province.clone()).collect()
    }

    pub fn categories(&self) -> BTreeSet<String> {
        self.lines.iter().map(|l| l.category.clone()).collect()
    }
}
