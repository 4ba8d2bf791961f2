//! Query spec types, validation and rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::transport::{Method, QueryRequest};

/// Stable secondary sort key appended to every ordering so pagination is
/// deterministic when the primary sort key ties.
const TIE_BREAK_COLUMN: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Select)
    }

    fn method(&self) -> Method {
        match self {
            Operation::Select => Method::Get,
            Operation::Insert => Method::Post,
            Operation::Update => Method::Patch,
            Operation::Delete => Method::Delete,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::In => "in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

/// Declarative query over one table. Build with the `select`/`insert`/
/// `update`/`delete` constructors and chain the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub table: String,
    pub operation: Operation,
    pub filters: Vec<Filter>,
    pub sort: Option<Sort>,
    pub page: Option<Page>,
    /// Projected columns for selects; `None` means `*`.
    pub columns: Option<Vec<String>>,
    /// JSON body for inserts and updates.
    pub payload: Option<Value>,
}

impl QuerySpec {
    fn new(table: &str, operation: Operation) -> Self {
        Self {
            table: table.to_string(),
            operation,
            filters: Vec::new(),
            sort: None,
            page: None,
            columns: None,
            payload: None,
        }
    }

    pub fn select(table: &str) -> Self {
        Self::new(table, Operation::Select)
    }

    pub fn insert(table: &str, payload: Value) -> Self {
        let mut spec = Self::new(table, Operation::Insert);
        spec.payload = Some(payload);
        spec
    }

    pub fn update(table: &str, payload: Value) -> Self {
        let mut spec = Self::new(table, Operation::Update);
        spec.payload = Some(payload);
        spec
    }

    pub fn delete(table: &str) -> Self {
        Self::new(table, Operation::Delete)
    }

    pub fn filter(mut self, column: &str, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.sort = Some(Sort {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.page = Some(Page { limit, offset });
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Reject specs that the backend would misinterpret or that would do
    /// something unintended (like an unfiltered update). Validation errors
    /// are never retried.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.table.is_empty() || self.table.chars().any(|c| c.is_whitespace()) {
            return Err(ClientError::Validation(format!(
                "invalid table name {:?}",
                self.table
            )));
        }
        match self.operation {
            Operation::Insert => {
                if !matches!(self.payload, Some(Value::Object(_)) | Some(Value::Array(_))) {
                    return Err(ClientError::Validation(
                        "insert requires an object or array payload".into(),
                    ));
                }
            }
            Operation::Update => {
                if !matches!(self.payload, Some(Value::Object(_))) {
                    return Err(ClientError::Validation(
                        "update requires an object payload".into(),
                    ));
                }
                if self.filters.is_empty() {
                    return Err(ClientError::Validation(
                        "update without filters would touch every row".into(),
                    ));
                }
            }
            Operation::Delete => {
                if self.filters.is_empty() {
                    return Err(ClientError::Validation(
                        "delete without filters would touch every row".into(),
                    ));
                }
            }
            Operation::Select => {}
        }
        for filter in &self.filters {
            if filter.column.is_empty() {
                return Err(ClientError::Validation("filter column must not be empty".into()));
            }
            if filter.op == FilterOp::In {
                match &filter.value {
                    Value::Array(values) if !values.is_empty() => {}
                    _ => {
                        return Err(ClientError::Validation(format!(
                            "in-filter on {} requires a non-empty array",
                            filter.column
                        )));
                    }
                }
            }
            if filter.op == FilterOp::Like && !filter.value.is_string() {
                return Err(ClientError::Validation(format!(
                    "like-filter on {} requires a string pattern",
                    filter.column
                )));
            }
        }
        if let Some(page) = &self.page {
            if page.limit == 0 {
                return Err(ClientError::Validation("page limit must be > 0".into()));
            }
        }
        Ok(())
    }

    /// Render to a concrete backend request. Filters are emitted in
    /// canonical order so equivalent specs produce identical requests.
    pub fn render(&self) -> QueryRequest {
        let mut params: Vec<(String, String)> = Vec::new();

        if self.operation == Operation::Select {
            let projection = self
                .columns
                .as_ref()
                .map(|c| c.join(","))
                .unwrap_or_else(|| "*".to_string());
            params.push(("select".to_string(), projection));
        }

        let mut filters: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.column.clone(), render_condition(f)))
            .collect();
        filters.sort();
        params.extend(filters);

        if self.operation == Operation::Select {
            params.push(("order".to_string(), self.render_order()));
        }

        if let Some(page) = &self.page {
            params.push(("limit".to_string(), page.limit.to_string()));
            params.push(("offset".to_string(), page.offset.to_string()));
        }

        QueryRequest {
            method: self.operation.method(),
            path: format!("/rest/v1/{}", self.table),
            params,
            body: self.payload.clone(),
        }
    }

    fn render_order(&self) -> String {
        match &self.sort {
            Some(sort) => {
                let direction = if sort.descending { "desc" } else { "asc" };
                if sort.column == TIE_BREAK_COLUMN {
                    format!("{}.{direction}", sort.column)
                } else {
                    format!("{}.{direction},{TIE_BREAK_COLUMN}.desc", sort.column)
                }
            }
            // no requested sort still gets a stable order for pagination
            None => format!("{TIE_BREAK_COLUMN}.desc"),
        }
    }

    /// Normalized signature: cache key and deduplication key for reads.
    pub fn cache_key(&self) -> String {
        let request = self.render();
        let params: Vec<String> = request
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}?{}", request.path, params.join("&"))
    }

    /// Metric label, e.g. `select strategies`.
    pub fn query_type(&self) -> String {
        format!("{} {}", self.operation, self.table)
    }
}

fn render_condition(filter: &Filter) -> String {
    match filter.op {
        FilterOp::In => {
            let items: Vec<String> = filter
                .value
                .as_array()
                .map(|values| values.iter().map(render_scalar).collect())
                .unwrap_or_default();
            format!("in.({})", items.join(","))
        }
        op => format!("{}.{}", op.as_str(), render_scalar(&filter.value)),
    }
}

/// Strings render bare (PostgREST style); everything else as JSON.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_order_does_not_change_signature() {
        let a = QuerySpec::select("strategies")
            .filter("status", FilterOp::Eq, json!("active"))
            .filter("owner_id", FilterOp::Eq, json!("u1"));
        let b = QuerySpec::select("strategies")
            .filter("owner_id", FilterOp::Eq, json!("u1"))
            .filter("status", FilterOp::Eq, json!("active"));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_render_select_with_tie_break() {
        let spec = QuerySpec::select("strategies")
            .columns(&["id", "name"])
            .filter("status", FilterOp::Eq, json!("active"))
            .order_by("name", false)
            .page(20, 40);
        let request = spec.render();
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.path, "/rest/v1/strategies");
        assert!(request.params.contains(&("select".into(), "id,name".into())));
        assert!(request.params.contains(&("status".into(), "eq.active".into())));
        assert!(request.params.contains(&("order".into(), "name.asc,created_at.desc".into())));
        assert!(request.params.contains(&("limit".into(), "20".into())));
        assert!(request.params.contains(&("offset".into(), "40".into())));
    }

    #[test]
    fn test_sort_on_tie_break_column_not_duplicated() {
        let spec = QuerySpec::select("strategies").order_by("created_at", true);
        let request = spec.render();
        assert!(request.params.contains(&("order".into(), "created_at.desc".into())));
    }

    #[test]
    fn test_in_filter_rendering() {
        let spec = QuerySpec::select("robots").filter(
            "status",
            FilterOp::In,
            json!(["draft", "compiled"]),
        );
        let request = spec.render();
        assert!(request.params.contains(&("status".into(), "in.(draft,compiled)".into())));
    }

    #[test]
    fn test_numeric_filter_rendering() {
        let spec = QuerySpec::select("metrics").filter("score", FilterOp::Gte, json!(0.8));
        let request = spec.render();
        assert!(request.params.contains(&("score".into(), "gte.0.8".into())));
    }

    #[test]
    fn test_validation_rejects_bad_specs() {
        assert!(QuerySpec::select("").validate().is_err());
        assert!(QuerySpec::select("bad table").validate().is_err());
        assert!(
            QuerySpec::update("strategies", json!({ "name": "x" }))
                .validate()
                .is_err(),
            "unfiltered update must be rejected"
        );
        assert!(QuerySpec::delete("strategies").validate().is_err());
        assert!(QuerySpec::insert("strategies", json!(null)).validate().is_err());
        assert!(
            QuerySpec::select("s")
                .filter("id", FilterOp::In, json!([]))
                .validate()
                .is_err()
        );
        assert!(
            QuerySpec::select("s")
                .filter("name", FilterOp::Like, json!(5))
                .validate()
                .is_err()
        );
        assert!(QuerySpec::select("s").page(0, 0).validate().is_err());
    }

    #[test]
    fn test_valid_specs_pass() {
        QuerySpec::select("strategies")
            .filter("status", FilterOp::Eq, json!("active"))
            .page(10, 0)
            .validate()
            .unwrap();
        QuerySpec::update("strategies", json!({ "name": "x" }))
            .filter("id", FilterOp::Eq, json!("abc"))
            .validate()
            .unwrap();
        QuerySpec::insert("strategies", json!({ "name": "x" }))
            .validate()
            .unwrap();
    }
}
