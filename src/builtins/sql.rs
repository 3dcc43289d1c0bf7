use crate::app::error::HookError;
use crate::app::registry::{Call, Function, HookResult, Param};
use crate::app::resolver::stringify;
use serde_json::{json, Number, Value};
use Cast::{Float, Keep};
use Missing::{Empty, Null};

pub const DEFAULT_DATABASE: &str = "main";

#[derive(Debug, Clone, Copy)]
enum Cast {
    Keep,
    Float,
}

/// Result of a lookup that found no row.
#[derive(Debug, Clone, Copy)]
enum Missing {
    Null,
    Empty,
    Zero,
}

impl Missing {
    fn value(self) -> Value {
        match self {
            Missing::Null => Value::Null,
            Missing::Empty => Value::String(String::new()),
            Missing::Zero => Value::from(0),
        }
    }
}

/// `SELECT <select> FROM <table> WHERE <key> = <param> LIMIT 1`, read from `column`.
#[derive(Debug)]
struct Lookup {
    name: &'static str,
    param: &'static str,
    select: &'static str,
    column: &'static str,
    table: &'static str,
    key: &'static str,
    cast: Cast,
    missing: Missing,
}

const fn by_id(
    name: &'static str,
    param: &'static str,
    column: &'static str,
    table: &'static str,
    cast: Cast,
    missing: Missing,
) -> Lookup {
    Lookup {
        name,
        param,
        select: column,
        column,
        table,
        key: "id",
        cast,
        missing,
    }
}

const fn item(name: &'static str, select: &'static str, column: &'static str, cast: Cast) -> Lookup {
    Lookup {
        name,
        param: "order_id",
        select,
        column,
        table: "order_items",
        key: "order_id",
        cast,
        missing: Missing::Null,
    }
}

const LOOKUPS: &[Lookup] = &[
    by_id("hook_query_user_username", "user_id", "username", "users", Keep, Empty),
    by_id("hook_query_user_email", "user_id", "email", "users", Keep, Empty),
    by_id("hook_query_user_role", "user_id", "role", "users", Keep, Empty),
    by_id("hook_query_user_full_name", "user_id", "full_name", "users", Keep, Empty),
    by_id("hook_query_user_shipping_address", "user_id", "shipping_address", "users", Keep, Empty),
    by_id("hook_query_product_name", "product_id", "name", "products", Keep, Null),
    by_id("hook_query_product_stock", "product_id", "stock", "products", Keep, Null),
    by_id("hook_query_product_price", "product_id", "price", "products", Float, Null),
    by_id("hook_query_product_description", "product_id", "description", "products", Keep, Null),
    by_id("hook_query_order_status", "order_id", "status", "orders", Keep, Null),
    by_id("hook_query_order_total_price", "order_id", "total_price", "orders", Float, Null),
    by_id("hook_query_order_shipping_address", "order_id", "shipping_address", "orders", Keep, Null),
    by_id("hook_query_order_owner_id", "order_id", "owner_id", "orders", Keep, Null),
    item("hook_query_order_item_quantity", "quantity", "quantity", Keep),
    item("hook_query_order_item_product_id", "product_id", "product_id", Keep),
    item("hook_query_order_item_price", "price_at_purchase", "price_at_purchase", Float),
    item(
        "hook_query_order_total_calculated",
        "SUM(price_at_purchase * quantity) AS total",
        "total",
        Float,
    ),
    Lookup {
        name: "hook_query_user_order_count",
        param: "user_id",
        select: "COUNT(*) AS count",
        column: "count",
        table: "orders",
        key: "owner_id",
        cast: Keep,
        missing: Missing::Zero,
    },
];

/// (function, parameter, table, label) of the non-asserting existence checks.
const PREPARATIONS: &[(&str, &str, &str, &str)] = &[
    ("setup_hook_prepare_user_data", "user_id", "users", "User"),
    ("setup_hook_prepare_product_data", "product_id", "products", "Product"),
    ("setup_hook_prepare_order_data", "order_id", "orders", "Order"),
];

pub fn functions() -> Vec<Function> {
    let lookups = LOOKUPS.iter().map(|lookup| {
        Function::new(lookup.name, vec![Param::required(lookup.param)], move |call| {
            query_value(lookup, &call)
        })
    });
    let preparations = PREPARATIONS.iter().map(|&(name, param, table, label)| {
        Function::new(name, vec![Param::required(param)], move |call| {
            prepare(&call, param, table, label)
        })
    });
    let mut functions: Vec<Function> = lookups.chain(preparations).collect();
    functions.push(Function::new("setup_hook_create_test_data", vec![], |_| {
        info!("Preparing test data");
        Ok(Value::Null)
    }));
    functions.extend(vec![
        Function::new(
            "setup_hook_assert_sql",
            vec![
                Param::required("identifier"),
                Param::optional("query", Value::Null),
                Param::optional("db_name", DEFAULT_DATABASE),
                Param::optional("role", Value::Null),
                Param::optional("fail_message", Value::Null),
            ],
            assert_sql,
        ),
        Function::new(
            "expected_sql_value",
            vec![
                Param::required("identifier"),
                Param::optional("query", Value::Null),
                Param::optional("column", "status"),
                Param::optional("db_name", DEFAULT_DATABASE),
                Param::optional("role", Value::Null),
                Param::optional("default", Value::Null),
            ],
            expected_value,
        ),
        Function::new(
            "teardown_hook_cleanup_test_user",
            vec![Param::required("response"), Param::required("variables")],
            cleanup_user,
        ),
        Function::new(
            "teardown_hook_cleanup_test_order",
            vec![Param::required("response"), Param::required("variables")],
            cleanup_order,
        ),
    ]);
    functions
}

/// SQL literal for an identifier: integers stay bare, anything else is
/// quoted.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => number.to_string(),
        Value::String(text) if !text.is_empty() && text.parse::<i64>().is_ok() => text.clone(),
        other => format!("'{}'", stringify(other).replace('\'', "''")),
    }
}

fn statement(call: &Call, select: &str) -> String {
    match call.opt_str("query") {
        Some(query) => query.to_owned(),
        None => format!(
            "SELECT {} FROM users WHERE id = {}",
            select,
            literal(call.arg("identifier"))
        ),
    }
}

fn rows(call: &Call, sql: &str) -> Result<Vec<crate::database::Row>, HookError> {
    let db_name = call.opt_str("db_name").unwrap_or(DEFAULT_DATABASE);
    let database = call.database(db_name, call.opt_str("role"))?;
    Ok(database.query(sql)?)
}

fn query_value(lookup: &Lookup, call: &Call) -> HookResult {
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {} LIMIT 1",
        lookup.select,
        lookup.table,
        lookup.key,
        literal(call.arg(lookup.param))
    );
    let found = rows(call, &sql)?;
    let value = match found.first().and_then(|row| row.get(lookup.column)) {
        Some(value) => value.clone(),
        None => return Ok(lookup.missing.value()),
    };
    match (lookup.cast, value) {
        (Cast::Keep, value) | (Cast::Float, value @ Value::Null) => Ok(value),
        (Cast::Float, value) => number(&value)
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                HookError::other(format!("{}: '{}' is not a number", lookup.name, value))
            }),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Logs whether the row exists; never fails on a missing row.
fn prepare(call: &Call, param: &str, table: &str, label: &str) -> HookResult {
    let id = call.arg(param);
    let sql = format!("SELECT id FROM {} WHERE id = {}", table, literal(id));
    if rows(call, &sql)?.is_empty() {
        warn!("{} not found: {}={}", label, param, stringify(id));
    } else {
        info!("{} data ready: {}={}", label, param, stringify(id));
    }
    Ok(Value::Null)
}

fn assert_sql(call: Call) -> HookResult {
    let sql = statement(&call, "id, status");
    let found = rows(&call, &sql)?;
    if found.is_empty() {
        let message = call
            .opt_str("fail_message")
            .map(str::to_owned)
            .unwrap_or_else(|| format!("SQL returned no rows: {}", sql));
        return Err(HookError::assertion(message));
    }
    debug!("SQL check passed with {} row(s): {}", found.len(), sql);
    Ok(json!({ "sql_assert_ok": true }))
}

fn expected_value(call: Call) -> HookResult {
    let column = call.text("column");
    let sql = statement(&call, &column);
    let found = rows(&call, &sql)?;
    match found.first() {
        Some(row) => row.get(&column).cloned().ok_or_else(|| {
            HookError::assertion(format!("Column '{}' not found in SQL result", column))
        }),
        None => match call.arg("default") {
            Value::Null => Err(HookError::assertion(format!(
                "SQL returned no rows: {}",
                sql
            ))),
            default => Ok(default.clone()),
        },
    }
}

fn cleanup_user(call: Call) -> HookResult {
    let user_id = match identifier(&call, "user_id") {
        Some(id) => id,
        None => return Ok(Value::Null),
    };
    cleanup(&call, &[format!("DELETE FROM users WHERE id = {}", user_id)]);
    Ok(Value::Null)
}

fn cleanup_order(call: Call) -> HookResult {
    let order_id = match identifier(&call, "order_id") {
        Some(id) => id,
        None => return Ok(Value::Null),
    };
    cleanup(
        &call,
        &[
            format!("DELETE FROM order_items WHERE order_id = {}", order_id),
            format!("DELETE FROM orders WHERE id = {}", order_id),
        ],
    );
    Ok(Value::Null)
}

fn identifier(call: &Call, name: &str) -> Option<String> {
    match call.variables.as_ref().and_then(|vars| vars.get(name)) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) if text.is_empty() => None,
        Some(value) => Some(literal(value)),
    }
}

/// Best effort: failures are logged and never fail the step.
fn cleanup(call: &Call, statements: &[String]) {
    let database = match call.database(DEFAULT_DATABASE, None) {
        Ok(database) => database,
        Err(err) => {
            warn!("{}: {}", call.function, err);
            return;
        }
    };
    for sql in statements {
        match database.execute(sql) {
            Ok(affected) => debug!("{} ({} row(s))", sql, affected),
            Err(err) => {
                warn!("{}: {}", call.function, err);
                return;
            }
        }
    }
}
