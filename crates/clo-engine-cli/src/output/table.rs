use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Nested lists printed as their own tables, in this order.
const SECTIONS: [&str; 7] = [
    "records",
    "tranche_balances",
    "results",
    "triggers",
    "coverage_snapshot",
    "account_rows",
    "positions",
];

/// Columns worth showing for wide row types; other rows show every scalar field.
const RECORD_COLUMNS: [&str; 7] = [
    "step_sequence",
    "step_name",
    "amount_due",
    "amount_paid",
    "amount_deferred",
    "shortfall",
    "remaining_cash",
];

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result(result);
                print_envelope(map);
            } else {
                print_object(map);
            }
        }
        Value::Array(arr) => print_array_table(arr, None),
        _ => println!("{}", value),
    }
}

fn print_result(result: &Value) {
    match result {
        Value::Object(map) => print_object(map),
        Value::Array(arr) => print_array_table(arr, None),
        other => println!("{}", format_value(other)),
    }
}

/// Scalar fields as a Field/Value table, then each known nested list.
fn print_object(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        if is_section(key, val) {
            continue;
        }
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));

    for key in SECTIONS {
        if let Some(Value::Array(rows)) = map.get(key) {
            println!("\n{}:", key);
            let columns = (key == "records").then_some(&RECORD_COLUMNS[..]);
            print_array_table(rows, columns);
        }
    }
    for (key, val) in map {
        if let Value::Object(inner) = val {
            if inner.values().any(|v| v.is_array()) {
                println!("\n{}:", key);
                print_object(inner);
            }
        }
    }
}

fn is_section(key: &str, val: &Value) -> bool {
    match val {
        Value::Array(_) => SECTIONS.contains(&key),
        Value::Object(inner) => inner.values().any(|v| v.is_array()),
        _ => false,
    }
}

fn print_envelope(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_array_table(arr: &[Value], columns: Option<&[&str]>) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<String> = match columns {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => first
                .iter()
                .filter(|(_, v)| !v.is_array() && !v.is_object())
                .map(|(k, _)| k.clone())
                .collect(),
        };
        let mut builder = Builder::default();
        builder.push_record(&headers);
        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default())
                    .collect();
                builder.push_record(row);
            }
        }
        println!("{}", Table::from(builder));
    } else {
        for item in arr {
            println!("{}", format_value(item));
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
