//! Owned, already-read copies of a table, used by the HTTP engine.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use super::{Cell, Table};
use crate::error::{AppError, Result};

// Create static selectors to avoid recompiling them each time
static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("table").expect("Failed to parse table selector")
});
static BODY_ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("tbody tr").expect("Failed to parse body row selector")
});
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("td").expect("Failed to parse td selector")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCell {
    pub text: String,
    pub attributes: HashMap<String, String>,
}

impl StaticCell {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.attributes.insert("class".to_string(), class.into());
        self
    }

    fn from_element(element: ElementRef<'_>) -> Self {
        Self {
            text: element.text().collect::<String>().trim().to_string(),
            attributes: element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticTable {
    pub rows: Vec<Vec<StaticCell>>,
}

impl StaticTable {
    pub fn new(rows: Vec<Vec<StaticCell>>) -> Self {
        Self { rows }
    }

    /// Snapshots the body rows of the first table in `html`.
    pub fn first_in(html: &str) -> Option<Self> {
        let document = Html::parse_document(html);
        let table = document.select(&TABLE_SELECTOR).next()?;

        let rows = table
            .select(&BODY_ROW_SELECTOR)
            .map(|row| row.select(&CELL_SELECTOR).map(StaticCell::from_element).collect())
            .collect();

        Some(Self { rows })
    }
}

#[async_trait]
impl Table for StaticTable {
    async fn row_count(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    async fn cells(&self, index: usize) -> Result<Vec<Box<dyn Cell>>> {
        let row = self
            .rows
            .get(index)
            .ok_or_else(|| AppError::Extraction(format!("row {} out of range", index)))?;
        Ok(row
            .iter()
            .cloned()
            .map(|cell| Box::new(cell) as Box<dyn Cell>)
            .collect())
    }
}

#[async_trait]
impl Cell for StaticCell {
    async fn text(&self) -> Result<String> {
        Ok(self.text.clone())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.attributes.get(name).cloned())
    }
}
