//! Query command implementation

use crate::error::Result;
use crate::store::TableStore;
use serde_json::{Map, Value};

/// Run an ad-hoc SQL statement over the silver tables
pub async fn cmd_query(store: &TableStore, sql: &str) -> Result<Vec<Map<String, Value>>> {
    tracing::debug!("Running query: {}", sql);
    store.query_json(sql).await
}

pub fn print_query_results(rows: &[Map<String, Value>]) {
    let Some(first) = rows.first() else {
        println!("No rows.");
        return;
    };

    let headers: Vec<&String> = first.keys().collect();
    println!(
        "{}",
        headers
            .iter()
            .map(|h| h.as_str())
            .collect::<Vec<_>>()
            .join("\t")
    );

    for row in rows {
        let cells = headers
            .iter()
            .map(|h| match row.get(h.as_str()) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect::<Vec<_>>();
        println!("{}", cells.join("\t"));
    }

    println!("\n({} rows)", rows.len());
}
