pub mod auth_service;
pub mod menu_service;
pub mod order_service;
pub mod otp_service;
pub mod review_service;
pub mod shipper_service;
