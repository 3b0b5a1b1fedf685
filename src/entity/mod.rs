pub mod audit_logs;
pub mod menu_items;
pub mod merchants;
pub mod order_items;
pub mod orders;
pub mod otp_requests;
pub mod reviews;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use menu_items::Entity as MenuItems;
pub use merchants::Entity as Merchants;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use otp_requests::Entity as OtpRequests;
pub use reviews::Entity as Reviews;
pub use users::Entity as Users;
