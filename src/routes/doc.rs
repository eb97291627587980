use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        admin::InventoryAdjustRequest,
        cart::{AddToCartRequest, CartItemDto, CartList},
        orders::{OrderList, OrderStatusChange, OrderWithItems, UpdateOrderStatusRequest},
        payments::{ClientSecret, CreateIntentRequest, WebhookReceipt},
    },
    models::{CartItem, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Product},
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, orders, params, payments, webhooks},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::list_order,
        orders::checkout,
        orders::get_order,
        payments::create_intent,
        payments::get_payment_for_order,
        webhooks::stripe_webhook,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::adjust_inventory
    ),
    components(
        schemas(
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Payment,
            PaymentStatus,
            AddToCartRequest,
            CartItemDto,
            CartList,
            OrderList,
            OrderWithItems,
            OrderStatusChange,
            UpdateOrderStatusRequest,
            InventoryAdjustRequest,
            CreateIntentRequest,
            ClientSecret,
            WebhookReceipt,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<CartList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<OrderStatusChange>,
            ApiResponse<ClientSecret>,
            ApiResponse<Payment>,
            ApiResponse<WebhookReceipt>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order and checkout endpoints"),
        (name = "Payments", description = "Payment intent endpoints"),
        (name = "Webhooks", description = "Payment processor notifications"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
