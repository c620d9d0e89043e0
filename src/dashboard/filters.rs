// src/dashboard/filters.rs

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};

use super::dataset::{Dataset, InvoiceFact, LineFact};

/// Dashboard filters. Empty sets select everything; missing dates fall back to the data range.
#[derive(Clone, Debug, Default)]
pub struct Filters {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub branches: BTreeSet<String>,
    pub provinces: BTreeSet<String>,
    pub categories: BTreeSet<String>,
}

/// Facts left after filtering, with the resolved date range.
#[derive(Clone, Debug)]
pub struct Selection<'a> {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub invoices: Vec<&'a InvoiceFact>,
    pub lines: Vec<&'a LineFact>,
}

fn allows(set: &BTreeSet<String>, value: &str) -> bool {
    set.is_empty() || set.contains(value)
}

impl Filters {
    pub fn range(&self, dataset: &Dataset) -> Option<(NaiveDate, NaiveDate)> {
        let bounds = dataset.date_bounds();
        let from = self.from.or(bounds.map(|(min, _)| min))?;
        let to = self.to.or(bounds.map(|(_, max)| max))?;
        Some((from, to))
    }

    fn keeps_invoice(&self, invoice: &InvoiceFact, from: NaiveDate, to: NaiveDate) -> bool {
        let day = invoice.date.date();
        day >= from && day <= to && allows(&self.branches, &invoice.branch) && allows(&self.provinces, &invoice.province)
    }

    fn keeps_line(&self, line: &LineFact, from: NaiveDate, to: NaiveDate) -> bool {
        let day = line.date.date();
        day >= from
            && day <= to
            && allows(&self.branches, &line.branch)
            && allows(&self.provinces, &line.province)
            && allows(&self.categories, &line.category)
    }

    fn select_between<'a>(&self, dataset: &'a Dataset, from: NaiveDate, to: NaiveDate) -> Selection<'a> {
        Selection {
            from,
            to,
            invoices: dataset.invoices.iter().filter(|i| self.keeps_invoice(i, from, to)).collect(),
            lines: dataset.lines.iter().filter(|l| self.keeps_line(l, from, to)).collect(),
        }
    }

    /// `None` only when the dataset has no invoices and no dates were given.
    pub fn select<'a>(&self, dataset: &'a Dataset) -> Option<Selection<'a>> {
        let (from, to) = self.range(dataset)?;
        Some(self.select_between(dataset, from, to))
    }

    /// Same filters over the period of equal length ending the day before `from`.
    pub fn previous_period<'a>(&self, dataset: &'a Dataset) -> Option<Selection<'a>> {
        let (from, to) = self.range(dataset)?;
        let days = (to - from).num_days().max(0) + 1;
        let previous_to = from - Duration::days(1);
        let previous_from = from - Duration::days(days);
        Some(self.select_between(dataset, previous_from, previous_to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::dataset::tests::sample;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    #[test]
    fn defaults_select_everything() {
        let dataset = sample();
        let selection = Filters::default().select(&dataset).unwrap();
        assert_eq!(selection.invoices.len(), 4);
        assert_eq!(selection.lines.len(), 5);
        assert_eq!((selection.from, selection.to), (day(1, 1), day(3, 9)));
    }

    #[test]
    fn date_range_is_inclusive() {
        let dataset = sample();
        let filters = Filters { from: Some(day(1, 15)), to: Some(day(3, 4)), ..Filters::default() };
        let selection = filters.select(&dataset).unwrap();
        let ids = selection.invoices.iter().map(|i| i.invoice_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn categories_only_narrow_lines() {
        let dataset = sample();
        let filters = Filters { categories: ["Limpieza".to_string()].into(), ..Filters::default() };
        let selection = filters.select(&dataset).unwrap();
        assert_eq!(selection.invoices.len(), 4);
        assert_eq!(selection.lines.len(), 1);
    }

    #[test]
    fn branch_and_province_sets() {
        let dataset = sample();
        let filters = Filters {
            branches: ["Norte".to_string()].into(),
            provinces: ["Jujuy".to_string(), "Salta".to_string()].into(),
            ..Filters::default()
        };
        let selection = filters.select(&dataset).unwrap();
        assert!(selection.invoices.iter().all(|i| i.branch == "Norte"));
        assert_eq!(selection.invoices.len(), 2);
    }

    #[test]
    fn previous_period_has_equal_length() {
        let dataset = sample();
        let filters = Filters { from: Some(day(3, 1)), to: Some(day(3, 31)), ..Filters::default() };
        let previous = filters.previous_period(&dataset).unwrap();
        assert_eq!(previous.from, day(1, 30));
        assert_eq!(previous.to, day(2, 29));
        assert!(previous.invoices.is_empty());
    }

    #[test]
    fn empty_dataset_without_dates_selects_nothing() {
        assert!(Filters::default().select(&Dataset::default()).is_none());
    }
}
