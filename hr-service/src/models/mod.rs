//! Domain models for hr-service.

mod employee;
mod payment;
mod payroll;
mod profile;
mod subscription;

pub use employee::{ContractType, CreateEmployee, Employee};
pub use payment::{Payment, PaymentStatus, RecordPayment};
pub use payroll::{CreatePayrollConfig, Deductions, EmployerContributions, PayrollConfig};
pub use profile::ProfileStatus;
pub use subscription::{
    CreateSubscription, PaymentProvider, PlanType, Subscription, SubscriptionStatus,
    ACTIVATION_BACKUP_WINDOW_MINUTES, ACTIVATION_WINDOW_MINUTES, SUBSCRIPTION_PERIOD_DAYS,
};
