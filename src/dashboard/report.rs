// src/dashboard/report.rs

use std::{
    cmp::Reverse,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, NaiveDateTime};
use clap::ValueEnum;
use rust_xlsxwriter::{Format, Workbook};

use super::Analysis;
use crate::error::{Result, TienditaError};

const MONEY: &str = "$#,##0.00";
const INTEGER: &str = "#,##0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    #[value(name = "sucursales")]
    Branches,
    #[value(name = "productos")]
    Products,
    #[value(name = "clientes")]
    Clients,
    #[value(name = "proveedores")]
    Suppliers,
}

impl ReportKind {
    pub fn title(&self) -> &'static str {
        match self {
            ReportKind::Branches => "Ventas por Sucursal",
            ReportKind::Products => "Performance de Productos",
            ReportKind::Clients => "Análisis de Clientes",
            ReportKind::Suppliers => "Datos de Proveedores",
        }
    }

    fn slug(&self) -> &'static str {
        match self {
            ReportKind::Branches => "sucursales",
            ReportKind::Products => "productos",
            ReportKind::Clients => "clientes",
            ReportKind::Suppliers => "proveedores",
        }
    }
}

enum Cell {
    Text(String),
    Money(f64),
    Integer(f64),
}

struct Sheet {
    name: &'static str,
    title: &'static str,
    headers: &'static [&'static str],
    rows: Vec<Vec<Cell>>,
}

fn write_sheet(workbook: &mut Workbook, sheet: Sheet) -> Result<()> {
    let money = Format::new().set_num_format(MONEY);
    let integer = Format::new().set_num_format(INTEGER);
    let bold = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet.name)?;
    worksheet.write_string_with_format(0, 0, sheet.title, &bold)?;
    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(1, col as u16, *header, &bold)?;
    }

    for (index, row) in sheet.rows.iter().enumerate() {
        let row_number = index as u32 + 2;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => worksheet.write_string(row_number, col, text)?,
                Cell::Money(value) => worksheet.write_number_with_format(row_number, col, *value, &money)?,
                Cell::Integer(value) => worksheet.write_number_with_format(row_number, col, *value, &integer)?,
            };
        }
    }

    // first column holds names, the rest figures
    worksheet.set_column_width(0, 30)?;
    for col in 1..sheet.headers.len() {
        worksheet.set_column_width(col as u16, 15)?;
    }
    Ok(())
}

fn sheets(kind: ReportKind, analysis: &Analysis) -> Vec<Sheet> {
    match kind {
        ReportKind::Branches => {
            let k = &analysis.kpis;
            vec![
                Sheet {
                    name: "Ventas por Sucursal",
                    title: "Ventas por Sucursal",
                    headers: &["Sucursal", "Ventas Totales", "Ticket Promedio", "N° Facturas", "Clientes Únicos"],
                    rows: analysis
                        .branches
                        .iter()
                        .map(|b| {
                            vec![
                                Cell::Text(b.branch.clone()),
                                Cell::Money(b.sales),
                                Cell::Money(b.average_ticket),
                                Cell::Integer(b.invoices as f64),
                                Cell::Integer(b.clients as f64),
                            ]
                        })
                        .collect(),
                },
                Sheet {
                    name: "Resumen Ejecutivo",
                    title: "Resumen Ejecutivo",
                    headers: &["Métrica", "Valor"],
                    rows: vec![
                        vec![Cell::Text("Ventas Totales del Período".into()), Cell::Money(k.total_sales)],
                        vec![
                            Cell::Text("Sucursal Mejor Performance".into()),
                            Cell::Text(analysis.branches.first().map_or("N/A".into(), |b| b.branch.clone())),
                        ],
                        vec![Cell::Text("Ticket Promedio General".into()), Cell::Money(k.average_ticket)],
                        vec![Cell::Text("Total de Facturas".into()), Cell::Integer(k.invoices as f64)],
                        vec![Cell::Text("Clientes Únicos".into()), Cell::Integer(k.unique_clients as f64)],
                    ],
                },
            ]
        }
        ReportKind::Products => vec![
            Sheet {
                name: "Top Productos",
                title: "Top Productos por Ventas",
                headers: &["Producto", "Ventas Totales", "Unidades Vendidas", "N° Facturas", "Ventas por Unidad"],
                rows: analysis
                    .products
                    .iter()
                    .map(|p| {
                        vec![
                            Cell::Text(p.product.clone()),
                            Cell::Money(p.sales),
                            Cell::Integer(p.units),
                            Cell::Integer(p.invoices as f64),
                            Cell::Money(p.per_unit),
                        ]
                    })
                    .collect(),
            },
            Sheet {
                name: "Performance Rubro",
                title: "Performance por Rubro",
                headers: &["Rubro", "Ventas Totales", "Unidades Vendidas", "Productos Únicos"],
                rows: analysis
                    .categories
                    .iter()
                    .map(|c| {
                        vec![
                            Cell::Text(c.category.clone()),
                            Cell::Money(c.sales),
                            Cell::Integer(c.units),
                            Cell::Integer(c.products as f64),
                        ]
                    })
                    .collect(),
            },
        ],
        ReportKind::Clients => vec![
            Sheet {
                name: "Segmentación Clientes",
                title: "Segmentación de Clientes",
                headers: &["Cliente", "Monto Total", "Frecuencia", "Última Compra", "Recencia", "Nivel Valor"],
                rows: analysis
                    .segments
                    .iter()
                    .map(|s| {
                        vec![
                            Cell::Integer(s.client_id as f64),
                            Cell::Money(s.total),
                            Cell::Integer(s.frequency as f64),
                            Cell::Text(s.last_purchase.to_string()),
                            Cell::Integer(s.recency_days as f64),
                            Cell::Text(s.level.label().to_string()),
                        ]
                    })
                    .collect(),
            },
            Sheet {
                name: "Top Clientes",
                title: "Top 10 Clientes",
                headers: &[
                    "Cliente",
                    "Total Gastado",
                    "Compras Realizadas",
                    "Primera Compra",
                    "Última Compra",
                    "Ticket Promedio",
                ],
                rows: analysis
                    .clients
                    .iter()
                    .map(|c| {
                        vec![
                            Cell::Text(c.name.clone()),
                            Cell::Money(c.total),
                            Cell::Integer(c.purchases as f64),
                            Cell::Text(c.first_purchase.to_string()),
                            Cell::Text(c.last_purchase.to_string()),
                            Cell::Money(c.average_ticket),
                        ]
                    })
                    .collect(),
            },
        ],
        ReportKind::Suppliers => vec![
            Sheet {
                name: "Performance Proveedores",
                title: "Performance de Proveedores",
                headers: &[
                    "Proveedor",
                    "Ventas Totales",
                    "Unidades Vendidas",
                    "Productos Únicos",
                    "Facturas",
                    "Margen por Producto",
                ],
                rows: analysis
                    .suppliers
                    .iter()
                    .map(|s| {
                        vec![
                            Cell::Text(s.supplier.clone()),
                            Cell::Money(s.sales),
                            Cell::Integer(s.units),
                            Cell::Integer(s.products as f64),
                            Cell::Integer(s.invoices as f64),
                            Cell::Money(s.per_product),
                        ]
                    })
                    .collect(),
            },
            Sheet {
                name: "Productos Proveedor",
                title: "Top Productos por Proveedor",
                headers: &["Proveedor", "Producto", "Ventas Totales", "Unidades Vendidas"],
                rows: analysis
                    .supplier_products
                    .iter()
                    .map(|p| {
                        vec![
                            Cell::Text(p.supplier.clone()),
                            Cell::Text(p.product.clone()),
                            Cell::Money(p.sales),
                            Cell::Integer(p.units),
                        ]
                    })
                    .collect(),
            },
        ],
    }
}

pub fn write_report(path: &Path, kind: ReportKind, analysis: &Analysis) -> Result<()> {
    let mut workbook = Workbook::new();
    for sheet in sheets(kind, analysis) {
        write_sheet(&mut workbook, sheet)?;
    }
    workbook.save(path)?;
    tracing::info!(report = kind.title(), path = %path.display(), "excel report written");
    Ok(())
}

pub fn default_name(kind: ReportKind, at: NaiveDateTime) -> String {
    format!("reporte_{}_{}", kind.slug(), at.format("%Y%m%d_%H%M%S"))
}

/// Reports live directly in `dir`; `.xlsx` is appended when missing.
pub fn report_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(TienditaError::InvalidInput(format!("nombre de reporte inválido '{}'", name)));
    }
    let file = if name.ends_with(".xlsx") { name.to_string() } else { format!("{}.xlsx", name) };
    Ok(dir.join(file))
}

pub fn save_report(dir: &Path, name: &str, kind: ReportKind, analysis: &Analysis) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = report_path(dir, name)?;
    write_report(&path, kind, analysis)?;
    Ok(path)
}

#[derive(Clone, Debug, PartialEq)]
pub struct SavedReport {
    pub name: String,
    pub size_kb: f64,
    pub modified: NaiveDateTime,
}

/// Most recently modified reports first.
pub fn recent_reports(dir: &Path, limit: usize) -> Result<Vec<SavedReport>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reports = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".xlsx") {
            continue;
        }
        let metadata = entry.metadata()?;
        reports.push(SavedReport {
            name,
            size_kb: metadata.len() as f64 / 1024.0,
            modified: DateTime::<Local>::from(metadata.modified()?).naive_local(),
        });
    }

    reports.sort_by_key(|r| Reverse((r.modified, r.name.clone())));
    reports.truncate(limit);
    Ok(reports)
}

pub fn delete_report(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = report_path(dir, name)?;
    fs::remove_file(&path)?;
    tracing::info!(path = %path.display(), "report deleted");
    Ok(path)
}
