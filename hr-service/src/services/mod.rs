//! Services module for hr-service.

pub mod database;
pub mod deductions;
pub mod mercadopago;
pub mod metrics;
pub mod payu;

pub use database::Database;
pub use deductions::calculate_deductions;
pub use mercadopago::MercadoPagoClient;
pub use metrics::{get_metrics, init_metrics};
pub use payu::PayuClient;
