//! Test fixtures and spreadsheet generators.

use rust_xlsxwriter::Workbook;

pub const OWNER: &str = "owner-1";
pub const OTHER_OWNER: &str = "owner-2";

/// One catalog row as written to a fixture file.
#[derive(Debug, Clone)]
pub struct CatalogRow {
    pub name: String,
    pub category: String,
    pub price: String,
    pub stock: String,
    pub description: String,
}

impl CatalogRow {
    pub fn new(name: &str, category: &str, price: &str, stock: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            price: price.to_string(),
            stock: stock.to_string(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Generate N valid, distinct catalog rows.
pub fn catalog_rows(n: usize) -> Vec<CatalogRow> {
    (0..n)
        .map(|i| {
            CatalogRow::new(
                &format!("Item {}", i),
                "Hardware",
                &format!("{}.25", i + 1),
                &(i % 7).to_string(),
            )
        })
        .collect()
}

/// Render rows as CSV with a header line.
pub fn csv(rows: &[CatalogRow]) -> String {
    let mut out = String::from("Name,Category,Price,Stock,Description\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            row.name, row.category, row.price, row.stock, row.description
        ));
    }
    out
}

/// Render rows as a single-sheet xlsx workbook.
///
/// Numeric-looking price and stock values are written as number cells.
pub fn xlsx(rows: &[CatalogRow]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, header) in ["name", "category", "price", "stock", "description"]
        .iter()
        .enumerate()
    {
        sheet.write_string(0, col as u16, *header).unwrap();
    }

    for (i, row) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write_string(r, 0, &row.name).unwrap();
        sheet.write_string(r, 1, &row.category).unwrap();
        match row.price.parse::<f64>() {
            Ok(price) => sheet.write_number(r, 2, price).unwrap(),
            Err(_) => sheet.write_string(r, 2, &row.price).unwrap(),
        };
        if let Ok(stock) = row.stock.parse::<f64>() {
            sheet.write_number(r, 3, stock).unwrap();
        }
        if !row.description.is_empty() {
            sheet.write_string(r, 4, &row.description).unwrap();
        }
    }

    workbook.save_to_buffer().unwrap()
}

/// Body of `POST /imports`.
pub fn start_body(file_name: &str, source_url: &str) -> serde_json::Value {
    serde_json::json!({
        "fileName": file_name,
        "sourceUrl": source_url,
    })
}

/// Source URL for a fixture file name.
pub fn source_url(file_name: &str) -> String {
    format!("https://files.example.com/uploads/{}", file_name)
}
