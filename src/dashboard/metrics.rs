// src/dashboard/metrics.rs

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashSet},
};

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use super::filters::Selection;

pub const WEEKDAYS: [&str; 7] = ["Lunes", "Martes", "Miércoles", "Jueves", "Viernes", "Sábado", "Domingo"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Kpis {
    pub total_sales: f64,
    pub invoices: usize,
    pub unique_clients: usize,
    pub average_ticket: f64,
    pub units_sold: f64,
    pub unique_products: usize,
    pub average_margin: f64,
    pub purchase_frequency: f64,
    /// Percent change against the preceding period; `None` when that period sold nothing.
    pub growth: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonthBucket {
    pub month_end: NaiveDate,
    pub sales: f64,
    pub invoices: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeekdayBucket {
    pub day: &'static str,
    pub sales: f64,
    pub invoices: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProvinceSales {
    pub province: String,
    pub sales: f64,
    pub clients: usize,
    pub invoices: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BranchMetrics {
    pub branch: String,
    pub sales: f64,
    pub average_ticket: f64,
    pub invoices: usize,
    pub clients: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RadarSeries {
    pub branch: String,
    /// sales, ticket, invoices, clients; each divided by the column maximum
    pub values: [f64; 4],
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductSales {
    pub product: String,
    pub sales: f64,
    pub units: f64,
    pub invoices: usize,
    pub per_unit: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryPerformance {
    pub category: String,
    pub sales: f64,
    pub units: f64,
    pub products: usize,
    pub invoices: usize,
    pub per_unit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ValueLevel {
    Alto,
    Medio,
    Bajo,
}

impl ValueLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ValueLevel::Alto => "Alto",
            ValueLevel::Medio => "Medio",
            ValueLevel::Bajo => "Bajo",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClientSegment {
    pub client_id: i64,
    pub total: f64,
    pub frequency: usize,
    pub last_purchase: NaiveDate,
    pub recency_days: i64,
    pub level: ValueLevel,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub counts: BTreeMap<ValueLevel, usize>,
    pub average_total: f64,
    pub average_frequency: f64,
    pub average_recency: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopClient {
    pub name: String,
    pub total: f64,
    pub purchases: usize,
    pub first_purchase: NaiveDate,
    pub last_purchase: NaiveDate,
    pub average_ticket: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SupplierRanking {
    pub supplier: String,
    pub sales: f64,
    pub units: f64,
    pub products: usize,
    pub invoices: usize,
    pub per_product: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SupplierProduct {
    pub supplier: String,
    pub product: String,
    pub sales: f64,
    pub units: f64,
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values.into_iter().fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Linear interpolation between the closest ranks.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64))
}

pub fn kpis(selection: &Selection, previous: Option<&Selection>) -> Kpis {
    let total_sales = selection.invoices.iter().map(|i| i.total).sum::<f64>();
    let invoices = selection.invoices.len();
    let unique_clients = selection.invoices.iter().map(|i| i.client_id).collect::<HashSet<_>>().len();
    let previous_sales = previous.map(|p| p.invoices.iter().map(|i| i.total).sum::<f64>()).unwrap_or(0.0);

    Kpis {
        total_sales,
        invoices,
        unique_clients,
        average_ticket: mean(selection.invoices.iter().map(|i| i.total)),
        units_sold: selection.lines.iter().map(|l| l.quantity).sum(),
        unique_products: selection.lines.iter().map(|l| l.product_id).collect::<HashSet<_>>().len(),
        average_margin: mean(selection.lines.iter().map(|l| l.subtotal - l.price)),
        purchase_frequency: ratio(invoices as f64, unique_clients as f64),
        growth: (previous_sales > 0.0).then(|| (total_sales / previous_sales - 1.0) * 100.0),
    }
}

fn month_end(day: NaiveDate) -> NaiveDate {
    let first = day.with_day(1).unwrap_or(day);
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day)
}

/// One bucket per calendar month between the first and last sale, empty months included.
pub fn monthly(selection: &Selection) -> Vec<MonthBucket> {
    let mut buckets = BTreeMap::<NaiveDate, (f64, usize)>::new();
    for invoice in &selection.invoices {
        let bucket = buckets.entry(month_end(invoice.date.date())).or_default();
        bucket.0 += invoice.total;
        bucket.1 += 1;
    }

    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };

    let mut months = Vec::new();
    let mut current = first;
    while current <= last {
        let (sales, invoices) = buckets.get(&current).copied().unwrap_or_default();
        months.push(MonthBucket { month_end: current, sales, invoices });
        let Some(next) = current.succ_opt().map(month_end) else { break };
        current = next;
    }
    months
}

/// Monday to Sunday; days without sales report zero.
pub fn weekdays(selection: &Selection) -> Vec<WeekdayBucket> {
    let mut buckets = [(0.0, 0usize); 7];
    for invoice in &selection.invoices {
        let slot = &mut buckets[invoice.date.weekday().num_days_from_monday() as usize];
        slot.0 += invoice.total;
        slot.1 += 1;
    }
    WEEKDAYS
        .iter()
        .zip(buckets)
        .map(|(&day, (sales, invoices))| WeekdayBucket { day, sales, invoices })
        .collect()
}

pub fn provinces(selection: &Selection) -> Vec<ProvinceSales> {
    let mut groups = BTreeMap::<&str, (f64, HashSet<i64>, usize)>::new();
    for invoice in &selection.invoices {
        let group = groups.entry(invoice.province.as_str()).or_default();
        group.0 += invoice.total;
        group.1.insert(invoice.client_id);
        group.2 += 1;
    }
    let mut provinces = groups
        .into_iter()
        .map(|(province, (sales, clients, invoices))| ProvinceSales {
            province: province.to_string(),
            sales,
            clients: clients.len(),
            invoices,
        })
        .collect::<Vec<_>>();
    provinces.sort_by(|a, b| descending(a.sales, b.sales));
    provinces
}

pub fn branches(selection: &Selection) -> Vec<BranchMetrics> {
    let mut groups = BTreeMap::<&str, (f64, usize, HashSet<i64>)>::new();
    for invoice in &selection.invoices {
        let group = groups.entry(invoice.branch.as_str()).or_default();
        group.0 += invoice.total;
        group.1 += 1;
        group.2.insert(invoice.client_id);
    }
    let mut branches = groups
        .into_iter()
        .map(|(branch, (sales, invoices, clients))| BranchMetrics {
            branch: branch.to_string(),
            sales: round2(sales),
            average_ticket: round2(ratio(sales, invoices as f64)),
            invoices,
            clients: clients.len(),
        })
        .collect::<Vec<_>>();
    branches.sort_by(|a, b| descending(a.sales, b.sales));
    branches
}

/// Top three branches with each metric scaled by its maximum over all branches.
pub fn radar(branches: &[BranchMetrics]) -> Vec<RadarSeries> {
    let column = |f: fn(&BranchMetrics) -> f64| branches.iter().map(f).fold(0.0, f64::max);
    let maxima = [
        column(|b| b.sales),
        column(|b| b.average_ticket),
        column(|b| b.invoices as f64),
        column(|b| b.clients as f64),
    ];
    branches
        .iter()
        .take(3)
        .map(|b| {
            let raw = [b.sales, b.average_ticket, b.invoices as f64, b.clients as f64];
            let mut values = [0.0; 4];
            for (slot, (value, max)) in values.iter_mut().zip(raw.iter().zip(maxima)) {
                *slot = ratio(*value, max);
            }
            RadarSeries { branch: b.branch.clone(), values }
        })
        .collect()
}

pub fn top_products(selection: &Selection, limit: usize) -> Vec<ProductSales> {
    let mut groups = BTreeMap::<&str, (f64, f64, HashSet<i64>)>::new();
    for line in &selection.lines {
        let group = groups.entry(line.product.as_str()).or_default();
        group.0 += line.subtotal;
        group.1 += line.quantity;
        group.2.insert(line.invoice_id);
    }
    let mut products = groups
        .into_iter()
        .map(|(product, (sales, units, invoices))| ProductSales {
            product: product.to_string(),
            sales,
            units,
            invoices: invoices.len(),
            per_unit: ratio(sales, units),
        })
        .collect::<Vec<_>>();
    products.sort_by(|a, b| descending(a.sales, b.sales));
    products.truncate(limit);
    products
}

pub fn categories(selection: &Selection) -> Vec<CategoryPerformance> {
    let mut groups = BTreeMap::<&str, (f64, f64, HashSet<i64>, HashSet<i64>)>::new();
    for line in &selection.lines {
        let group = groups.entry(line.category.as_str()).or_default();
        group.0 += line.subtotal;
        group.1 += line.quantity;
        group.2.insert(line.product_id);
        group.3.insert(line.invoice_id);
    }
    let mut categories = groups
        .into_iter()
        .map(|(category, (sales, units, products, invoices))| CategoryPerformance {
            category: category.to_string(),
            sales,
            units,
            products: products.len(),
            invoices: invoices.len(),
            per_unit: ratio(sales, units),
        })
        .collect::<Vec<_>>();
    categories.sort_by(|a, b| descending(a.sales, b.sales));
    categories
}

/// Per-client value levels: Alto at or above the 70th percentile of spend,
/// Bajo at or below the 30th, Medio otherwise. Fewer than three clients are all Medio.
pub fn segments(selection: &Selection, today: NaiveDate) -> Vec<ClientSegment> {
    let mut groups = BTreeMap::<i64, (f64, usize, NaiveDate)>::new();
    for invoice in &selection.invoices {
        let day = invoice.date.date();
        let group = groups.entry(invoice.client_id).or_insert((0.0, 0, day));
        group.0 += invoice.total;
        group.1 += 1;
        group.2 = group.2.max(day);
    }

    let totals = groups.values().map(|g| round2(g.0)).collect::<Vec<_>>();
    let limits = if totals.len() >= 3 {
        quantile(&totals, 0.7).zip(quantile(&totals, 0.3))
    } else {
        None
    };

    groups
        .into_iter()
        .map(|(client_id, (total, frequency, last_purchase))| {
            let total = round2(total);
            let level = match limits {
                Some((_, low)) if total <= low => ValueLevel::Bajo,
                Some((high, _)) if total >= high => ValueLevel::Alto,
                _ => ValueLevel::Medio,
            };
            ClientSegment {
                client_id,
                total,
                frequency,
                last_purchase,
                recency_days: (today - last_purchase).num_days(),
                level,
            }
        })
        .collect()
}

pub fn segment_summary(segments: &[ClientSegment]) -> SegmentSummary {
    let mut counts = BTreeMap::new();
    for segment in segments {
        *counts.entry(segment.level).or_insert(0) += 1;
    }
    SegmentSummary {
        counts,
        average_total: mean(segments.iter().map(|s| s.total)),
        average_frequency: mean(segments.iter().map(|s| s.frequency as f64)),
        average_recency: mean(segments.iter().map(|s| s.recency_days as f64)),
    }
}

/// Clients grouped by name and surname, largest spend first.
pub fn top_clients(selection: &Selection, limit: usize) -> Vec<TopClient> {
    let mut groups = BTreeMap::<(&str, &str), (f64, usize, NaiveDate, NaiveDate)>::new();
    for invoice in &selection.invoices {
        let day = invoice.date.date();
        let key = (invoice.client_name.as_str(), invoice.client_surname.as_str());
        let group = groups.entry(key).or_insert((0.0, 0, day, day));
        group.0 += invoice.total;
        group.1 += 1;
        group.2 = group.2.min(day);
        group.3 = group.3.max(day);
    }
    let mut clients = groups
        .into_iter()
        .map(|((name, surname), (total, purchases, first_purchase, last_purchase))| TopClient {
            name: format!("{} {}", name, surname),
            total,
            purchases,
            first_purchase,
            last_purchase,
            average_ticket: ratio(total, purchases as f64),
        })
        .collect::<Vec<_>>();
    clients.sort_by(|a, b| descending(a.total, b.total));
    clients.truncate(limit);
    clients
}

pub fn suppliers(selection: &Selection) -> Vec<SupplierRanking> {
    let mut groups = BTreeMap::<&str, (f64, f64, HashSet<i64>, HashSet<i64>)>::new();
    for line in &selection.lines {
        let group = groups.entry(line.supplier.as_str()).or_default();
        group.0 += line.subtotal;
        group.1 += line.quantity;
        group.2.insert(line.product_id);
        group.3.insert(line.invoice_id);
    }
    let mut suppliers = groups
        .into_iter()
        .map(|(supplier, (sales, units, products, invoices))| SupplierRanking {
            supplier: supplier.to_string(),
            sales,
            units,
            products: products.len(),
            invoices: invoices.len(),
            per_product: ratio(sales, products.len() as f64),
        })
        .collect::<Vec<_>>();
    suppliers.sort_by(|a, b| descending(a.sales, b.sales));
    suppliers
}

pub fn supplier_products(selection: &Selection, limit: usize) -> Vec<SupplierProduct> {
    let mut groups = BTreeMap::<(&str, &str), (f64, f64)>::new();
    for line in &selection.lines {
        let group = groups.entry((line.supplier.as_str(), line.product.as_str())).or_default();
        group.0 += line.subtotal;
        group.1 += line.quantity;
    }
    let mut pairs = groups
        .into_iter()
        .map(|((supplier, product), (sales, units))| SupplierProduct {
            supplier: supplier.to_string(),
            product: product.to_string(),
            sales,
            units,
        })
        .collect::<Vec<_>>();
    pairs.sort_by(|a, b| descending(a.sales, b.sales));
    pairs.truncate(limit);
    pairs
}

/// Headline figures, formatted for display.
pub fn executive_summary(
    kpis: &Kpis,
    branches: &[BranchMetrics],
    products: &[ProductSales],
    clients: &[TopClient],
) -> Vec<(String, String)> {
    let first = |name: Option<&String>| name.cloned().unwrap_or_else(|| "N/A".to_string());
    vec![
        ("Ventas Totales del Período".into(), format!("${}", group_thousands(kpis.total_sales, 0))),
        (
            "Crecimiento vs Período Anterior".into(),
            kpis.growth.map(|g| format!("{:+.1}%", g)).unwrap_or_else(|| "N/A".to_string()),
        ),
        ("Clientes Activos".into(), group_thousands(kpis.unique_clients as f64, 0)),
        ("Productos Vendidos".into(), group_thousands(kpis.units_sold, 0)),
        ("Ticket Promedio".into(), format!("${}", group_thousands(kpis.average_ticket, 2))),
        ("Sucursal Mejor Performance".into(), first(branches.first().map(|b| &b.branch))),
        ("Producto Más Vendido".into(), first(products.first().map(|p| &p.product))),
        ("Cliente Más Valioso".into(), first(clients.first().map(|c| &c.name))),
    ]
}

/// `1234567.891` with two decimals becomes `1,234,567.89`.
pub fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer.to_string(), Some(fraction.to_string())),
        None => (formatted, None),
    };
    let digits = integer.chars().collect::<Vec<_>>();
    let mut grouped = String::new();
    for (i, digit) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit);
    }
    let sign = if value < 0.0 && formatted_is_nonzero(&grouped, fraction.as_deref()) { "-" } else { "" };
    match fraction {
        Some(fraction) => format!("{}{}.{}", sign, grouped, fraction),
        None => format!("{}{}", sign, grouped),
    }
}

fn formatted_is_nonzero(integer: &str, fraction: Option<&str>) -> bool {
    integer.chars().chain(fraction.unwrap_or("").chars()).any(|c| c.is_ascii_digit() && c != '0')
}
