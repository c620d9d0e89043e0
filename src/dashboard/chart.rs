// src/dashboard/chart.rs

use std::{fs::File, path::Path};

use serde::Serialize;

use super::{metrics::group_thousands, Analysis};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Radar,
    Treemap,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Labelled series ready for terminal rendering or external plotting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Chart {
    pub title: String,
    pub kind: ChartKind,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
}

impl Chart {
    pub fn new(title: &str, kind: ChartKind, labels: Vec<String>) -> Self {
        Self { title: title.to_string(), kind, labels, series: Vec::new() }
    }

    pub fn with_series(mut self, name: &str, values: Vec<f64>) -> Self {
        self.series.push(Series { name: name.to_string(), values });
        self
    }

    /// Horizontal bars, one block per series, scaled to `width` columns.
    pub fn render(&self, width: usize) -> String {
        let label_width = self.labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);
        let mut out = format!("{}\n", self.title);

        for series in &self.series {
            out.push_str(&format!("  {}\n", series.name));
            let max = series.values.iter().cloned().fold(0.0, f64::max);
            for (label, value) in self.labels.iter().zip(&series.values) {
                let length = if max > 0.0 { ((value.max(0.0) / max) * width as f64).round() as usize } else { 0 };
                out.push_str(&format!(
                    "  {:<lw$} |{:<w$} {}\n",
                    label,
                    "#".repeat(length),
                    group_thousands(*value, 2),
                    lw = label_width,
                    w = width
                ));
            }
        }
        out
    }
}

/// Every chart the dashboard shows, in display order.
pub fn charts(analysis: &Analysis) -> Vec<Chart> {
    let mut charts = Vec::new();

    let months = analysis.monthly.iter().map(|m| m.month_end.format("%Y-%m").to_string()).collect();
    charts.push(
        Chart::new("Evolución Mensual de Ventas", ChartKind::Line, months)
            .with_series("Ventas Totales", analysis.monthly.iter().map(|m| m.sales).collect())
            .with_series("N° Facturas", analysis.monthly.iter().map(|m| m.invoices as f64).collect()),
    );

    let days = analysis.weekdays.iter().map(|d| d.day.to_string()).collect();
    charts.push(
        Chart::new("Distribución Semanal de Ventas", ChartKind::Bar, days)
            .with_series("Ventas Totales", analysis.weekdays.iter().map(|d| d.sales).collect())
            .with_series("Transacciones", analysis.weekdays.iter().map(|d| d.invoices as f64).collect()),
    );

    charts.push(
        Chart::new(
            "Ventas Totales por Provincia",
            ChartKind::Bar,
            analysis.provinces.iter().map(|p| p.province.clone()).collect(),
        )
        .with_series("Ventas Totales", analysis.provinces.iter().map(|p| p.sales).collect()),
    );

    let mut radar = Chart::new(
        "Comparativa de Sucursales (Top 3)",
        ChartKind::Radar,
        ["Ventas", "Ticket", "Facturas", "Clientes"].iter().map(|s| s.to_string()).collect(),
    );
    for series in &analysis.radar {
        radar = radar.with_series(&series.branch, series.values.to_vec());
    }
    charts.push(radar);

    charts.push(
        Chart::new(
            "Productos por Ingresos Generados",
            ChartKind::Bar,
            analysis.products.iter().map(|p| p.product.clone()).collect(),
        )
        .with_series("Ventas Totales", analysis.products.iter().map(|p| p.sales).collect()),
    );

    charts.push(
        Chart::new("Ventas por Rubro", ChartKind::Bar, analysis.categories.iter().map(|c| c.category.clone()).collect())
            .with_series("Ventas Totales", analysis.categories.iter().map(|c| c.sales).collect())
            .with_series("Margen/Unidad", analysis.categories.iter().map(|c| c.per_unit).collect()),
    );

    let levels = analysis.segment_summary.counts.iter().collect::<Vec<_>>();
    charts.push(
        Chart::new(
            "Distribución de Clientes por Nivel de Valor",
            ChartKind::Pie,
            levels.iter().map(|(level, _)| level.label().to_string()).collect(),
        )
        .with_series("Clientes", levels.iter().map(|(_, count)| **count as f64).collect()),
    );

    charts.push(
        Chart::new(
            "Top 10 Clientes - Valor vs Frecuencia",
            ChartKind::Bar,
            analysis.clients.iter().map(|c| c.name.clone()).collect(),
        )
        .with_series("Total Gastado", analysis.clients.iter().map(|c| c.total).collect())
        .with_series("N° Compras", analysis.clients.iter().map(|c| c.purchases as f64).collect()),
    );

    let suppliers = analysis.suppliers.iter().take(15).collect::<Vec<_>>();
    charts.push(
        Chart::new(
            "Distribución de Ventas por Proveedor (Top 15)",
            ChartKind::Treemap,
            suppliers.iter().map(|s| s.supplier.clone()).collect(),
        )
        .with_series("Ventas Totales", suppliers.iter().map(|s| s.sales).collect()),
    );

    charts
}

pub fn write_json(path: &Path, charts: &[Chart]) -> Result<()> {
    serde_json::to_writer_pretty(File::create(path)?, charts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_scale_to_the_largest_value() {
        let chart = Chart::new("Ventas", ChartKind::Bar, vec!["Centro".into(), "Norte".into()])
            .with_series("Total", vec![800.0, 200.0]);
        let rendered = chart.render(8);
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "Ventas");
        assert_eq!(lines[2], "  Centro |######## 800.00");
        assert_eq!(lines[3], "  Norte  |##       200.00");
    }

    #[test]
    fn all_zero_series_renders_without_bars() {
        let chart = Chart::new("Vacio", ChartKind::Bar, vec!["Lunes".into()]).with_series("Ventas", vec![0.0]);
        assert!(chart.render(10).contains("Lunes |           0.00"));
    }

    #[test]
    fn serializes_kind_in_lowercase() {
        let chart = Chart::new("Radar", ChartKind::Radar, vec!["Ventas".into()]).with_series("Centro", vec![1.0]);
        let json = serde_json::to_value(&chart).unwrap();
        assert_eq!(json["kind"], "radar");
        assert_eq!(json["series"][0]["values"][0], 1.0);
    }

    #[test]
    fn writes_chart_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("charts.json");
        let chart = Chart::new("Ventas", ChartKind::Line, vec!["2024-01".into()]).with_series("Total", vec![1.5]);
        write_json(&path, &[chart]).unwrap();
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written[0]["title"], "Ventas");
    }
}
