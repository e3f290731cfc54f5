//! Grocery tools.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use serde_json::{json, Value};

use super::client::GroceryApi;
use crate::mcp::registry::{Tool, ToolRegistry};
use crate::mcp::schema::{Field, Schema};

/// Most items of one product a single call may add or remove.
pub const MAX_COUNT: f64 = 50.0;

/// Shape of product, slot and delivery identifiers.
pub const ID_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

/// Delivery states accepted by `get_deliveries`.
pub const DELIVERY_STATUSES: &[&str] = &["CURRENT", "COMPLETED", "CANCELLED"];

/// Registers every grocery tool.
pub fn register_tools(registry: &ToolRegistry, api: &Arc<dyn GroceryApi>) {
    let tools = [
        api_tool(
            api,
            "search_products",
            "Search the Picnic catalogue for products matching a query",
            Schema::object([query_field("Search terms, e.g. 'oat milk'")]),
            |api, input| async move { api.search(str_arg(&input, "query")?).await },
        ),
        api_tool(
            api,
            "get_suggestions",
            "Get search suggestions for a partial query",
            Schema::object([query_field("Partial search terms")]),
            |api, input| async move { api.suggestions(str_arg(&input, "query")?).await },
        ),
        api_tool(
            api,
            "get_article",
            "Get the full details of one product",
            Schema::object([id_field("product_id", "Product identifier")]),
            |api, input| async move { api.article(str_arg(&input, "product_id")?).await },
        ),
        api_tool(
            api,
            "get_cart",
            "Get the current shopping cart",
            Schema::empty_object(),
            |api, _| async move { api.cart().await },
        ),
        api_tool(
            api,
            "add_to_cart",
            "Add a product to the shopping cart",
            Schema::object([id_field("product_id", "Product identifier"), count_field()]),
            |api, input| async move {
                let count = count_arg(&input)?;
                api.add_to_cart(str_arg(&input, "product_id")?, count).await
            },
        ),
        api_tool(
            api,
            "remove_from_cart",
            "Remove a product from the shopping cart",
            Schema::object([id_field("product_id", "Product identifier"), count_field()]),
            |api, input| async move {
                let count = count_arg(&input)?;
                api.remove_from_cart(str_arg(&input, "product_id")?, count).await
            },
        ),
        api_tool(
            api,
            "clear_cart",
            "Remove every product from the shopping cart",
            Schema::empty_object(),
            |api, _| async move { api.clear_cart().await },
        ),
        api_tool(
            api,
            "get_delivery_slots",
            "List the delivery slots available for the current cart",
            Schema::empty_object(),
            |api, _| async move { api.delivery_slots().await },
        ),
        api_tool(
            api,
            "set_delivery_slot",
            "Select a delivery slot for the current cart",
            Schema::object([id_field("slot_id", "Slot identifier from get_delivery_slots")]),
            |api, input| async move { api.set_delivery_slot(str_arg(&input, "slot_id")?).await },
        ),
        api_tool(
            api,
            "get_deliveries",
            "List past and upcoming deliveries",
            Schema::object([Field::optional(
                "statuses",
                Schema::array(Schema::string().one_of(DELIVERY_STATUSES.iter().copied()))
                    .describe("Only deliveries in these states")
                    .default_value(json!([])),
            )]),
            |api, input| async move {
                let statuses: Vec<String> = serde_json::from_value(input["statuses"].clone())
                    .context("statuses must be a list of strings")?;
                api.deliveries(&statuses).await
            },
        ),
        api_tool(
            api,
            "get_delivery",
            "Get the details of one delivery",
            Schema::object([id_field("delivery_id", "Delivery identifier")]),
            |api, input| async move { api.delivery(str_arg(&input, "delivery_id")?).await },
        ),
        api_tool(
            api,
            "get_user_details",
            "Get the account holder's profile",
            Schema::empty_object(),
            |api, _| async move { api.user().await },
        ),
        api_tool(
            api,
            "get_lists",
            "Get the account's saved shopping lists",
            Schema::empty_object(),
            |api, _| async move { api.lists().await },
        ),
    ];

    for tool in tools {
        registry.register(tool);
    }
}

fn api_tool<F, Fut>(
    api: &Arc<dyn GroceryApi>,
    name: &str,
    description: &str,
    input_schema: Schema,
    call: F,
) -> Tool
where
    F: Fn(Arc<dyn GroceryApi>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let api = Arc::clone(api);
    Tool::new(name, description, input_schema, move |input| {
        call(Arc::clone(&api), input)
    })
}

fn query_field(description: &str) -> Field {
    Field::required("query", Schema::string().min_length(1).describe(description))
}

/// Identifiers end up as URL path segments, so only plain tokens pass.
fn id_field(name: &str, description: &str) -> Field {
    let schema = Schema::string().min_length(1).describe(description);
    let schema = match schema.clone().pattern(ID_PATTERN) {
        Ok(checked) => checked,
        Err(e) => {
            tracing::error!(error = %e, "invalid identifier pattern");
            schema
        }
    };
    Field::required(name, schema)
}

fn count_field() -> Field {
    Field::optional(
        "count",
        Schema::integer()
            .min(1.0)
            .max(MAX_COUNT)
            .describe("Number of items")
            .default_value(json!(1)),
    )
}

pub(crate) fn str_arg<'a>(input: &'a Value, name: &str) -> anyhow::Result<&'a str> {
    input
        .get(name)
        .and_then(Value::as_str)
        .with_context(|| format!("missing string argument '{name}'"))
}

fn count_arg(input: &Value) -> anyhow::Result<u32> {
    input
        .get("count")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .context("count must be a positive integer")
}


#[cfg(test)]
mod tests {
    use super::fake::FakeApi;
    use super::*;
    use crate::mcp::error::ErrorKind;

    fn setup() -> (ToolRegistry, Arc<FakeApi>) {
        let fake = Arc::new(FakeApi::default());
        let api: Arc<dyn GroceryApi> = fake.clone();
        let registry = ToolRegistry::new();
        register_tools(&registry, &api);
        (registry, fake)
    }

    #[test]
    fn registers_every_tool() {
        let (registry, _) = setup();
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names.len(), 13);
        assert!(names.contains(&"search_products".to_string()));
        assert!(names.contains(&"get_lists".to_string()));
    }

    #[tokio::test]
    async fn count_defaults_to_one() {
        let (registry, fake) = setup();
        registry
            .execute("add_to_cart", json!({ "product_id": "s100" }))
            .await
            .unwrap();
        registry
            .execute("remove_from_cart", json!({ "product_id": "s100", "count": 3 }))
            .await
            .unwrap();
        assert_eq!(*fake.calls.lock(), vec!["add:s100:1", "remove:s100:3"]);
    }

    #[tokio::test]
    async fn out_of_range_count_is_rejected() {
        let (registry, fake) = setup();
        let err = registry
            .execute("add_to_cart", json!({ "product_id": "s100", "count": 0 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolValidationFailed);
        assert!(fake.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn integral_float_counts_are_accepted() {
        let (registry, fake) = setup();
        registry
            .execute("add_to_cart", json!({ "product_id": "s100", "count": 2.0 }))
            .await
            .unwrap();
        assert_eq!(*fake.calls.lock(), vec!["add:s100:2"]);
    }

    #[tokio::test]
    async fn identifiers_cannot_escape_their_path_segment() {
        let (registry, fake) = setup();
        for (tool, field) in [("get_article", "product_id"), ("get_delivery", "delivery_id")] {
            let mut input = serde_json::Map::new();
            input.insert(field.to_string(), json!("../user"));
            let err = registry
                .execute(tool, Value::Object(input))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ToolValidationFailed);
        }
        assert!(fake.calls.lock().is_empty());

        registry
            .execute("get_article", json!({ "product_id": "s1001_B-2" }))
            .await
            .unwrap();
        assert_eq!(*fake.calls.lock(), vec!["article:s1001_B-2"]);
    }

    #[tokio::test]
    async fn deliveries_filter_by_status() {
        let (registry, fake) = setup();
        registry.execute("get_deliveries", json!({})).await.unwrap();
        registry
            .execute("get_deliveries", json!({ "statuses": ["COMPLETED"] }))
            .await
            .unwrap();
        assert_eq!(*fake.calls.lock(), vec!["deliveries:", "deliveries:COMPLETED"]);

        let err = registry
            .execute("get_deliveries", json!({ "statuses": ["LOST"] }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolValidationFailed);
    }

    #[tokio::test]
    async fn upstream_failures_become_execution_errors() {
        let (registry, _) = setup();
        let err = registry.execute("get_user_details", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecutionFailed);
        assert!(err.message().contains("user endpoint unavailable"));
    }

    #[tokio::test]
    async fn search_results_are_formatted_as_text() {
        let (registry, _) = setup();
        let result = registry
            .execute("search_products", json!({ "query": "milk" }))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.first_text().unwrap().contains("search:milk"));
    }
}
