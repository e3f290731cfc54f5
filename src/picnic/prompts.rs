//! Shopping prompt templates.

use std::fmt::Write as _;

use serde_json::{json, Value};

use crate::mcp::registry::prompts::PromptMessage;
use crate::mcp::registry::{Prompt, PromptRegistry};
use crate::mcp::schema::{Field, Schema};

/// Registers the shopping prompts.
pub fn register_prompts(registry: &PromptRegistry) {
    registry.register(Prompt::new(
        "grocery_list",
        "Turn a free-form shopping list into products in the Picnic cart",
        Schema::object([
            Field::required(
                "items",
                Schema::string().min_length(1).describe("What to buy, one item per line or comma separated"),
            ),
            Field::optional(
                "preferences",
                Schema::string().describe("Brands, organic, dietary needs and similar"),
            ),
        ]),
        |args| async move { Ok(grocery_list(&args)) },
    ));

    registry.register(Prompt::new(
        "meal_planner",
        "Plan meals for a number of days and fill the cart with the ingredients",
        Schema::object([
            Field::optional(
                "days",
                Schema::integer().min(1.0).max(14.0).default_value(json!(7)).describe("Days to plan"),
            ),
            Field::optional(
                "people",
                Schema::integer().min(1.0).max(12.0).default_value(json!(2)).describe("People per meal"),
            ),
            Field::optional(
                "dietary_restrictions",
                Schema::string().describe("Allergies or diets to respect"),
            ),
        ]),
        |args| async move { Ok(meal_planner(&args)) },
    ));

    registry.register(Prompt::new(
        "budget_shopping",
        "Shop for the week while staying under a budget",
        Schema::object([
            Field::required("budget", Schema::number().min(0.0).describe("Maximum spend in euros")),
            Field::optional("needs", Schema::string().describe("Items that must be included")),
        ]),
        |args| async move { Ok(budget_shopping(&args)) },
    ));
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

fn grocery_list(args: &Value) -> Vec<PromptMessage> {
    let items = args["items"].as_str().unwrap_or_default();
    let mut text = format!(
        "Here is my shopping list:\n\n{items}\n\n\
         For each item, use search_products to find the best match and add it \
         with add_to_cart. If an item is ambiguous, pick the most common option \
         and mention it. Finish with get_cart and summarise the total."
    );
    if let Some(preferences) = optional_str(args, "preferences") {
        let _ = write!(text, "\n\nMy preferences: {preferences}");
    }
    vec![PromptMessage::user(text)]
}

fn meal_planner(args: &Value) -> Vec<PromptMessage> {
    let days = args["days"].as_u64().unwrap_or(7);
    let people = args["people"].as_u64().unwrap_or(2);
    let mut text = format!(
        "Plan dinners for {days} days for {people} people. List the meals first, \
         then search for every ingredient with search_products and add the \
         quantities needed to the cart with add_to_cart."
    );
    if let Some(restrictions) = optional_str(args, "dietary_restrictions") {
        let _ = write!(text, "\n\nDietary restrictions: {restrictions}");
    }
    vec![
        PromptMessage::user(text),
        PromptMessage::assistant(
            "I'll propose the meal plan first and wait for your approval before adding anything to the cart.",
        ),
    ]
}

fn budget_shopping(args: &Value) -> Vec<PromptMessage> {
    let budget = args["budget"].as_f64().unwrap_or_default();
    let mut text = format!(
        "I have a budget of €{budget:.2} for groceries this week. Use \
         search_products to compare prices, prefer cheaper alternatives of equal \
         quality, and keep a running total. Check get_cart before finishing and \
         stay under the budget."
    );
    if let Some(needs) = optional_str(args, "needs") {
        let _ = write!(text, "\n\nThese must be included: {needs}");
    }
    vec![PromptMessage::user(text)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::error::ErrorKind;
    use crate::mcp::registry::prompts::PromptContent;

    fn text(message: &PromptMessage) -> &str {
        let PromptContent::Text { text } = &message.content;
        text
    }

    #[tokio::test]
    async fn meal_planner_applies_defaults() {
        let registry = PromptRegistry::new();
        register_prompts(&registry);
        let result = registry.execute_prompt("meal_planner", json!({})).await.unwrap();
        assert_eq!(result.messages.len(), 2);
        assert!(text(&result.messages[0]).contains("7 days for 2 people"));
    }

    #[tokio::test]
    async fn optional_arguments_are_appended() {
        let registry = PromptRegistry::new();
        register_prompts(&registry);
        let result = registry
            .execute_prompt(
                "grocery_list",
                json!({ "items": "bread, eggs", "preferences": "organic" }),
            )
            .await
            .unwrap();
        let body = text(&result.messages[0]);
        assert!(body.contains("bread, eggs"));
        assert!(body.ends_with("My preferences: organic"));
    }

    #[tokio::test]
    async fn budget_is_required() {
        let registry = PromptRegistry::new();
        register_prompts(&registry);
        let err = registry.execute_prompt("budget_shopping", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PromptValidationFailed);

        let ok = registry
            .execute_prompt("budget_shopping", json!({ "budget": 42.5 }))
            .await
            .unwrap();
        assert!(text(&ok.messages[0]).contains("€42.50"));
    }
}
