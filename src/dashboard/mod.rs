// src/dashboard/mod.rs

pub mod chart;
pub mod dataset;
pub mod filters;
pub mod metrics;
pub mod report;

use chrono::NaiveDate;
use serde::Serialize;

use self::{
    dataset::Dataset,
    filters::Filters,
    metrics::{
        group_thousands, BranchMetrics, CategoryPerformance, ClientSegment, Kpis, MonthBucket, ProductSales,
        ProvinceSales, RadarSeries, SegmentSummary, SupplierProduct, SupplierRanking, TopClient, WeekdayBucket,
    },
};

/// Everything the dashboard shows for one set of filters.
#[derive(Clone, Debug, Serialize)]
pub struct Analysis {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub kpis: Kpis,
    pub monthly: Vec<MonthBucket>,
    pub weekdays: Vec<WeekdayBucket>,
    pub provinces: Vec<ProvinceSales>,
    pub branches: Vec<BranchMetrics>,
    pub radar: Vec<RadarSeries>,
    pub products: Vec<ProductSales>,
    pub categories: Vec<CategoryPerformance>,
    pub segments: Vec<ClientSegment>,
    pub segment_summary: SegmentSummary,
    pub clients: Vec<TopClient>,
    pub suppliers: Vec<SupplierRanking>,
    pub supplier_products: Vec<SupplierProduct>,
    pub summary: Vec<(String, String)>,
}

impl Analysis {
    /// `None` when there is nothing to date the selection with.
    pub fn compute(dataset: &Dataset, filters: &Filters, today: NaiveDate) -> Option<Self> {
        let selection = filters.select(dataset)?;
        let previous = filters.previous_period(dataset);

        let kpis = metrics::kpis(&selection, previous.as_ref());
        let branches = metrics::branches(&selection);
        let products = metrics::top_products(&selection, 10);
        let clients = metrics::top_clients(&selection, 10);
        let segments = metrics::segments(&selection, today);
        let summary = metrics::executive_summary(&kpis, &branches, &products, &clients);

        Some(Self {
            from: selection.from,
            to: selection.to,
            monthly: metrics::monthly(&selection),
            weekdays: metrics::weekdays(&selection),
            provinces: metrics::provinces(&selection),
            radar: metrics::radar(&branches),
            categories: metrics::categories(&selection),
            segment_summary: metrics::segment_summary(&segments),
            suppliers: metrics::suppliers(&selection),
            supplier_products: metrics::supplier_products(&selection, 20),
            kpis,
            branches,
            products,
            segments,
            clients,
            summary,
        })
    }

    pub fn render_kpis(&self) -> String {
        let k = &self.kpis;
        let growth = k.growth.map(|g| format!("{:+.1}%", g)).unwrap_or_else(|| "N/A".to_string());
        let rows = [
            ("Ventas Totales", format!("${} ({})", group_thousands(k.total_sales, 0), growth)),
            ("Total Facturas", group_thousands(k.invoices as f64, 0)),
            ("Clientes Únicos", group_thousands(k.unique_clients as f64, 0)),
            ("Ticket Promedio", format!("${}", group_thousands(k.average_ticket, 2))),
            ("Productos Vendidos", group_thousands(k.units_sold, 0)),
            ("Productos Únicos", group_thousands(k.unique_products as f64, 0)),
            ("Margen Promedio", format!("${}", group_thousands(k.average_margin, 2))),
            ("Frecuencia Compra", format!("{:.1}", k.purchase_frequency)),
        ];

        let mut out = format!("Período: {} a {}\n", self.from, self.to);
        for (name, value) in rows {
            out.push_str(&format!("  {:<20} {}\n", name, value));
        }
        out
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::from("Resumen Ejecutivo\n");
        for (metric, value) in &self.summary {
            out.push_str(&format!("  {:<34} {}\n", metric, value));
        }
        let s = &self.segment_summary;
        out.push_str(&format!(
            "  Gasto promedio ${} | Compras promedio {:.1} | Días sin compra {:.0}\n",
            group_thousands(s.average_total, 2),
            s.average_frequency,
            s.average_recency
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::dataset::tests::sample;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 19).unwrap()
    }

    #[test]
    fn computes_every_section() {
        let analysis = Analysis::compute(&sample(), &Filters::default(), today()).unwrap();
        assert_eq!(analysis.kpis.invoices, 4);
        assert_eq!(analysis.monthly.len(), 3);
        assert_eq!(analysis.weekdays.len(), 7);
        assert_eq!(analysis.radar.len(), 2);
        assert_eq!(analysis.segments.len(), 3);
        assert_eq!(analysis.supplier_products.len(), 3);
        assert_eq!(chart::charts(&analysis).len(), 9);
    }

    #[test]
    fn previous_period_feeds_growth() {
        let filters = Filters {
            from: NaiveDate::from_ymd_opt(2024, 1, 16),
            to: NaiveDate::from_ymd_opt(2024, 1, 30),
            ..Filters::default()
        };
        // 2024-01-01..2024-01-15 sold 400, the selected fortnight nothing
        let analysis = Analysis::compute(&sample(), &filters, today()).unwrap();
        assert_eq!(analysis.kpis.growth, Some(-100.0));
        assert!(analysis.render_kpis().contains("$0 (-100.0%)"));
    }

    #[test]
    fn renders_text_blocks() {
        let analysis = Analysis::compute(&sample(), &Filters::default(), today()).unwrap();
        let kpis = analysis.render_kpis();
        assert!(kpis.starts_with("Período: 2024-01-01 a 2024-03-09\n"));
        assert!(kpis.contains("Ticket Promedio      $245.00"));
        let summary = analysis.render_summary();
        assert!(summary.contains("Sucursal Mejor Performance"));
    }
}
