//! Read-only account resources.

use std::sync::Arc;

use super::client::GroceryApi;
use crate::mcp::registry::{Resource, ResourceRegistry};

pub const CART_URI: &str = "picnic://cart";
pub const USER_URI: &str = "picnic://user";
pub const DELIVERY_SLOTS_URI: &str = "picnic://delivery-slots";

/// Registers the account resources.
pub fn register_resources(registry: &ResourceRegistry, api: &Arc<dyn GroceryApi>) {
    let cart = Arc::clone(api);
    registry.register(Resource::new(
        CART_URI,
        "Shopping cart",
        "Current contents and total of the shopping cart",
        move |_, _| {
            let api = Arc::clone(&cart);
            async move { api.cart().await }
        },
    ));

    let user = Arc::clone(api);
    registry.register(Resource::new(
        USER_URI,
        "User profile",
        "Account holder details",
        move |_, _| {
            let api = Arc::clone(&user);
            async move { api.user().await }
        },
    ));

    let slots = Arc::clone(api);
    registry.register(Resource::new(
        DELIVERY_SLOTS_URI,
        "Delivery slots",
        "Delivery slots available for the current cart",
        move |_, _| {
            let api = Arc::clone(&slots);
            async move { api.delivery_slots().await }
        },
    ));
}
