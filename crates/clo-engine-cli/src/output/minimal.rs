use serde_json::{Map, Value};

/// Print a one-line headline of the result.
///
/// Each command's result has a recognisable shape; anything else falls back to the
/// first field of the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    match result_obj {
        Value::Object(map) => match headline(map) {
            Some(line) => println!("{}", line),
            None => {
                if let Some((key, val)) = map.iter().next() {
                    println!("{}: {}", key, format_minimal(val));
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                match item.as_object().and_then(headline_row) {
                    Some(line) => println!("{}", line),
                    None => println!("{}", format_minimal(item)),
                }
            }
        }
        other => println!("{}", format_minimal(other)),
    }
}

fn field(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).map(format_minimal).unwrap_or_default()
}

fn headline(map: &Map<String, Value>) -> Option<String> {
    if let Some(Value::Object(execution)) = map.get("execution") {
        let failed = map
            .get("compliance")
            .and_then(|c| c.get("failed"))
            .map(format_minimal)
            .unwrap_or_default();
        return Some(format!(
            "{} paid={} remaining={} compliance_failures={}",
            field(execution, "status"),
            field(&execution_totals(execution), "total_paid"),
            field(execution, "remaining_cash"),
            failed
        ));
    }
    if map.contains_key("records") {
        return Some(format!(
            "{} paid={} remaining={}",
            field(map, "status"),
            field(&execution_totals(map), "total_paid"),
            field(map, "remaining_cash")
        ));
    }
    if let Some(Value::Array(failing)) = map.get("failing_tests") {
        let names: Vec<String> = failing.iter().map(format_minimal).collect();
        return Some(format!(
            "passed={} failed={} {}",
            field(map, "passed"),
            field(map, "failed"),
            names.join(", ")
        ));
    }
    if let Some(Value::Array(triggers)) = map.get("triggers") {
        let states: Vec<String> = triggers
            .iter()
            .filter_map(Value::as_object)
            .map(|t| format!("{}-{}:{}", field(t, "tier"), field(t, "kind"), field(t, "state")))
            .collect();
        return Some(states.join(" "));
    }
    if let Some(Value::Object(totals)) = map.get("totals") {
        return Some(format!(
            "assets={} par={} interest={}",
            field(totals, "asset_count"),
            field(totals, "total_par_outstanding"),
            field(totals, "total_interest_collected")
        ));
    }
    None
}

/// Batch rows and standard test definitions.
fn headline_row(map: &Map<String, Value>) -> Option<String> {
    if map.contains_key("deal_id") && map.contains_key("status") {
        let detail = match map.get("error") {
            Some(e) => format_minimal(e),
            None => map
                .get("outcome")
                .and_then(Value::as_object)
                .and_then(headline)
                .unwrap_or_default(),
        };
        return Some(format!(
            "{} {} {} {}",
            field(map, "deal_id"),
            field(map, "payment_date"),
            field(map, "status"),
            detail
        ));
    }
    map.get("name").map(|n| {
        format!(
            "{} {} {}",
            format_minimal(n),
            field(map, "comparison"),
            field(map, "threshold_value")
        )
    })
}

fn execution_totals(execution: &Map<String, Value>) -> Map<String, Value> {
    execution
        .get("totals")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
