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
        auth::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, OtpIssuedResponse,
            RegisterConfirmRequest, RegisterRequestOtp, ResetPasswordConfirmRequest,
        },
        menus::{
            CreateMenuItemRequest, CreateMerchantRequest, MenuItemList, UpdateAvailabilityRequest,
            UpdateStockRequest,
        },
        orders::{
            CreateOrderRequest, OrderItemInput, OrderList, OrderWithItems, ReviewList,
            ReviewRequest, UpdateOrderStatusRequest,
        },
    },
    models::{MenuItem, Merchant, Order, OrderItem, OrderStatus, PaymentStatus, Review, User},
    response::{ApiResponse, ErrorBody, Meta},
    routes::{auth, health, merchant, orders, params, shipper},
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
        auth::register_request_otp,
        auth::register_confirm,
        auth::login,
        auth::forgot_request_otp,
        auth::reset_password_confirm,
        orders::list_orders,
        orders::create_order,
        orders::get_order,
        orders::cancel_order,
        orders::pay_order,
        orders::review_order,
        merchant::create_merchant,
        merchant::list_menu,
        merchant::create_menu_item,
        merchant::update_stock,
        merchant::update_availability,
        merchant::list_merchant_orders,
        merchant::update_order_status,
        merchant::list_reviews,
        shipper::list_available,
        shipper::list_deliveries,
        shipper::pickup_order,
        shipper::update_delivery_status
    ),
    components(
        schemas(
            User,
            Merchant,
            MenuItem,
            Order,
            OrderItem,
            Review,
            OrderStatus,
            PaymentStatus,
            RegisterRequestOtp,
            RegisterConfirmRequest,
            LoginRequest,
            LoginResponse,
            ForgotPasswordRequest,
            ResetPasswordConfirmRequest,
            OtpIssuedResponse,
            CreateMerchantRequest,
            CreateMenuItemRequest,
            UpdateStockRequest,
            UpdateAvailabilityRequest,
            MenuItemList,
            CreateOrderRequest,
            OrderItemInput,
            UpdateOrderStatusRequest,
            ReviewRequest,
            ReviewList,
            OrderList,
            OrderWithItems,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ErrorBody,
            ApiResponse<Order>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<MenuItemList>,
            ApiResponse<LoginResponse>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Registration, login and password reset"),
        (name = "Orders", description = "Customer order endpoints"),
        (name = "Merchant", description = "Merchant menu and order endpoints"),
        (name = "Shipper", description = "Shipper delivery endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
