//! Database service for hr-service.
//!
//! All subscription state transitions are predicate-qualified updates: the
//! expected prior status sits in the WHERE clause, so a transition that no
//! longer applies matches zero rows and becomes a no-op instead of an error.
//! Writes that touch both `subscriptions` and the `profiles` mirror share one
//! transaction.

use crate::models::{
    CreateEmployee, CreatePayrollConfig, CreateSubscription, Employee, Payment, PaymentProvider,
    PayrollConfig, PlanType, ProfileStatus, RecordPayment, Subscription,
    SUBSCRIPTION_PERIOD_DAYS,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, status, plan_type, provider, provider_reference, mercadopago_subscription_id, current_period_start, current_period_end, cancelled_at, cancellation_reason, cancel_at_period_end, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "hr-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Payroll Config Operations
    // =========================================================================

    /// Create a payroll configuration for a company and year. The
    /// `(company_id, year)` pair is unique; a duplicate year is a conflict,
    /// never an overwrite.
    #[instrument(skip(self, input), fields(company_id = %input.company_id, year = input.year))]
    pub async fn create_payroll_config(
        &self,
        input: &CreatePayrollConfig,
    ) -> Result<PayrollConfig, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_payroll_config"])
            .start_timer();

        let config_id = Uuid::new_v4();
        let config = sqlx::query_as::<_, PayrollConfig>(
            r#"
            INSERT INTO payroll_configs (config_id, company_id, year, minimum_wage, transportation_allowance, health_contribution_percentage, pension_contribution_percentage, solidarity_fund_threshold)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING config_id, company_id, year, minimum_wage, transportation_allowance, health_contribution_percentage, pension_contribution_percentage, solidarity_fund_threshold, created_utc, updated_utc
            "#,
        )
        .bind(config_id)
        .bind(input.company_id)
        .bind(input.year)
        .bind(input.minimum_wage)
        .bind(input.transportation_allowance)
        .bind(input.health_contribution_percentage)
        .bind(input.pension_contribution_percentage)
        .bind(input.solidarity_fund_threshold)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Payroll config for year {} already exists",
                    input.year
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create payroll config: {}", e)),
        })?;

        timer.observe_duration();
        info!(config_id = %config.config_id, "Payroll config created");

        Ok(config)
    }

    /// Get the payroll configuration for a company and year.
    #[instrument(skip(self), fields(company_id = %company_id, year = year))]
    pub async fn get_payroll_config(
        &self,
        company_id: Uuid,
        year: i32,
    ) -> Result<Option<PayrollConfig>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payroll_config"])
            .start_timer();

        let config = sqlx::query_as::<_, PayrollConfig>(
            r#"
            SELECT config_id, company_id, year, minimum_wage, transportation_allowance, health_contribution_percentage, pension_contribution_percentage, solidarity_fund_threshold, created_utc, updated_utc
            FROM payroll_configs
            WHERE company_id = $1 AND year = $2
            "#,
        )
        .bind(company_id)
        .bind(year)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get payroll config: {}", e)))?;

        timer.observe_duration();

        Ok(config)
    }

    /// List payroll configurations for a company, newest year first.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn list_payroll_configs(
        &self,
        company_id: Uuid,
    ) -> Result<Vec<PayrollConfig>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payroll_configs"])
            .start_timer();

        let configs = sqlx::query_as::<_, PayrollConfig>(
            r#"
            SELECT config_id, company_id, year, minimum_wage, transportation_allowance, health_contribution_percentage, pension_contribution_percentage, solidarity_fund_threshold, created_utc, updated_utc
            FROM payroll_configs
            WHERE company_id = $1
            ORDER BY year DESC
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payroll configs: {}", e)))?;

        timer.observe_duration();

        Ok(configs)
    }

    // =========================================================================
    // Employee Operations
    // =========================================================================

    /// Create an employee.
    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    pub async fn create_employee(&self, input: &CreateEmployee) -> Result<Employee, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_employee"])
            .start_timer();

        let employee_id = Uuid::new_v4();
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            INSERT INTO employees (employee_id, company_id, full_name, base_salary, contract_type)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING employee_id, company_id, full_name, base_salary, contract_type, is_active, created_utc, updated_utc
            "#,
        )
        .bind(employee_id)
        .bind(input.company_id)
        .bind(&input.full_name)
        .bind(input.base_salary)
        .bind(input.contract_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create employee: {}", e)))?;

        timer.observe_duration();
        info!(employee_id = %employee.employee_id, "Employee created");

        Ok(employee)
    }

    /// List active employees for a company.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn list_employees(&self, company_id: Uuid) -> Result<Vec<Employee>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_employees"])
            .start_timer();

        let employees = sqlx::query_as::<_, Employee>(
            r#"
            SELECT employee_id, company_id, full_name, base_salary, contract_type, is_active, created_utc, updated_utc
            FROM employees
            WHERE company_id = $1 AND is_active
            ORDER BY full_name
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list employees: {}", e)))?;

        timer.observe_duration();

        Ok(employees)
    }

    /// Count active employees for a company (plan-limit checks).
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn count_active_employees(&self, company_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_active_employees"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM employees WHERE company_id = $1 AND is_active
            "#,
        )
        .bind(company_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to count employees: {}", e)))?;

        timer.observe_duration();

        Ok(count)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Open a checkout: insert a `pending` subscription row.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_pending_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_pending_subscription"])
            .start_timer();

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, status, plan_type, provider, provider_reference)
            VALUES ($1, $2, 'pending', $3, $4, $5)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(input.user_id)
        .bind(input.plan_type.as_str())
        .bind(input.provider.as_str())
        .bind(&input.provider_reference)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e)))?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Pending subscription created");

        Ok(subscription)
    }

    /// Get a subscription by ID.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Most recent subscription row for a user, any status (settings page).
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn find_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_latest_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Find a user's active subscription, if any.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn find_active_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active'
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find active subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Activate a user's subscription on a verified approved payment.
    ///
    /// Order of attempts inside one transaction:
    /// 1. an existing `active` row makes redelivery a no-op,
    /// 2. the most recent `pending` row is promoted via a conditional update,
    /// 3. otherwise a fresh `active` row is inserted (covers reactivation and
    ///    webhooks that arrive before the checkout row landed).
    /// The payment (idempotency-guarded) and the profile mirror are written in
    /// the same transaction.
    #[instrument(skip(self, payment), fields(user_id = %user_id))]
    pub async fn activate_subscription(
        &self,
        user_id: Uuid,
        provider: PaymentProvider,
        mercadopago_subscription_id: Option<&str>,
        payment: Option<&RecordPayment>,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let existing_active = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active'
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check active subscription: {}", e)))?;

        let period_start = Utc::now();
        let period_end = period_start + ChronoDuration::days(SUBSCRIPTION_PERIOD_DAYS);

        let subscription = if let Some(active) = existing_active {
            active
        } else {
            let promoted = sqlx::query_as::<_, Subscription>(&format!(
                r#"
                UPDATE subscriptions
                SET status = 'active',
                    current_period_start = $2,
                    current_period_end = $3,
                    mercadopago_subscription_id = COALESCE($4, mercadopago_subscription_id),
                    cancelled_at = NULL,
                    cancellation_reason = NULL,
                    cancel_at_period_end = FALSE,
                    updated_utc = now()
                WHERE subscription_id = (
                    SELECT subscription_id FROM subscriptions
                    WHERE user_id = $1 AND status = 'pending'
                    ORDER BY created_utc DESC
                    LIMIT 1
                ) AND status = 'pending'
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#,
            ))
            .bind(user_id)
            .bind(period_start)
            .bind(period_end)
            .bind(mercadopago_subscription_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!("User already has an active subscription"))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to activate subscription: {}",
                    e
                )),
            })?;

            match promoted {
                Some(subscription) => subscription,
                None => sqlx::query_as::<_, Subscription>(&format!(
                    r#"
                    INSERT INTO subscriptions (subscription_id, user_id, status, plan_type, provider, mercadopago_subscription_id, current_period_start, current_period_end)
                    VALUES ($1, $2, 'active', $3, $4, $5, $6, $7)
                    RETURNING {SUBSCRIPTION_COLUMNS}
                    "#,
                ))
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(PlanType::Monthly.as_str())
                .bind(provider.as_str())
                .bind(mercadopago_subscription_id)
                .bind(period_start)
                .bind(period_end)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                        AppError::Conflict(anyhow::anyhow!(
                            "User already has an active subscription"
                        ))
                    }
                    _ => AppError::DatabaseError(anyhow::anyhow!(
                        "Failed to insert active subscription: {}",
                        e
                    )),
                })?,
            }
        };

        if let Some(payment) = payment {
            insert_payment(&mut tx, payment, Some(subscription.subscription_id)).await?;
        }
        upsert_profile_status(&mut tx, user_id, ProfileStatus::Premium).await?;

        tx.commit().await?;
        timer.observe_duration();

        info!(
            subscription_id = %subscription.subscription_id,
            user_id = %user_id,
            "Subscription active"
        );

        Ok(subscription)
    }

    /// Promote the user's most recent `pending` row created after `cutoff`
    /// (success-page reconciliation). No payment row: the webhook remains the
    /// audit source.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn activate_recent_pending(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["activate_recent_pending"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let period_start = Utc::now();
        let period_end = period_start + ChronoDuration::days(SUBSCRIPTION_PERIOD_DAYS);

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                current_period_start = $3,
                current_period_end = $4,
                cancelled_at = NULL,
                cancellation_reason = NULL,
                cancel_at_period_end = FALSE,
                updated_utc = now()
            WHERE subscription_id = (
                SELECT subscription_id FROM subscriptions
                WHERE user_id = $1 AND status = 'pending' AND created_utc >= $2
                ORDER BY created_utc DESC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(cutoff)
        .bind(period_start)
        .bind(period_end)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("User already has an active subscription"))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to activate subscription: {}", e)),
        })?;

        if let Some(ref subscription) = subscription {
            upsert_profile_status(&mut tx, user_id, ProfileStatus::Premium).await?;
            info!(
                subscription_id = %subscription.subscription_id,
                user_id = %user_id,
                "Subscription activated via reconciliation"
            );
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(subscription)
    }

    /// Mark the user's most recent `pending` row failed after a verified
    /// declined payment. The profile is never touched: a pending row was never
    /// premium.
    #[instrument(skip(self, payment), fields(user_id = %user_id))]
    pub async fn fail_pending_subscription(
        &self,
        user_id: Uuid,
        payment: Option<&RecordPayment>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_pending_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'failed', updated_utc = now()
            WHERE subscription_id = (
                SELECT subscription_id FROM subscriptions
                WHERE user_id = $1 AND status = 'pending'
                ORDER BY created_utc DESC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fail subscription: {}", e)))?;

        if let Some(payment) = payment {
            let subscription_id = subscription.as_ref().map(|s| s.subscription_id);
            insert_payment(&mut tx, payment, subscription_id).await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(subscription)
    }

    /// Cancel the user's most recent `pending` row with a diagnostic reason
    /// (provider-side expiry of the checkout).
    #[instrument(skip(self, payment), fields(user_id = %user_id))]
    pub async fn cancel_pending_subscription(
        &self,
        user_id: Uuid,
        reason: &str,
        payment: Option<&RecordPayment>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_pending_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = now(), cancellation_reason = $2, updated_utc = now()
            WHERE subscription_id = (
                SELECT subscription_id FROM subscriptions
                WHERE user_id = $1 AND status = 'pending'
                ORDER BY created_utc DESC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(user_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e)))?;

        if let Some(payment) = payment {
            let subscription_id = subscription.as_ref().map(|s| s.subscription_id);
            insert_payment(&mut tx, payment, subscription_id).await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(subscription)
    }

    /// Cancel an active subscription by row id (provider cancel webhook).
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_subscription"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = now(), cancellation_reason = $2, cancel_at_period_end = FALSE, updated_utc = now()
            WHERE subscription_id = $1 AND status = 'active'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e)))?;

        if let Some(ref subscription) = subscription {
            upsert_profile_status(&mut tx, subscription.user_id, ProfileStatus::Free).await?;
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(subscription)
    }

    /// User-initiated cancellation. Immediate cancellation flips the profile
    /// to free; cancel-at-period-end leaves the row active (and the profile
    /// premium) until the period-end sweep.
    #[instrument(skip(self), fields(user_id = %user_id, at_period_end = at_period_end))]
    pub async fn cancel_user_subscription(
        &self,
        user_id: Uuid,
        reason: Option<&str>,
        at_period_end: bool,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cancel_user_subscription"])
            .start_timer();

        let subscription = if at_period_end {
            sqlx::query_as::<_, Subscription>(&format!(
                r#"
                UPDATE subscriptions
                SET cancel_at_period_end = TRUE, cancelled_at = now(), cancellation_reason = $2, updated_utc = now()
                WHERE user_id = $1 AND status = 'active'
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#,
            ))
            .bind(user_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e)))?
        } else {
            let mut tx = self.pool.begin().await?;

            let subscription = sqlx::query_as::<_, Subscription>(&format!(
                r#"
                UPDATE subscriptions
                SET status = 'cancelled', cancelled_at = now(), cancellation_reason = $2, cancel_at_period_end = FALSE, updated_utc = now()
                WHERE user_id = $1 AND status = 'active'
                RETURNING {SUBSCRIPTION_COLUMNS}
                "#,
            ))
            .bind(user_id)
            .bind(reason)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e)))?;

            if subscription.is_some() {
                upsert_profile_status(&mut tx, user_id, ProfileStatus::Free).await?;
            }

            tx.commit().await?;
            subscription
        };

        timer.observe_duration();

        Ok(subscription)
    }

    // =========================================================================
    // Sweep Operations
    // =========================================================================

    /// Sweep `pending` rows created before `cutoff` to cancelled. Safe to run
    /// concurrently with itself: the status predicate makes the second run a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn sweep_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sweep_stale_pending"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = now(), cancellation_reason = $2, updated_utc = now()
            WHERE status = 'pending' AND created_utc < $1
            "#,
        )
        .bind(cutoff)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sweep pending subscriptions: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    /// Sweep one user's stale `pending` rows (failed-activation cleanup).
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn sweep_user_stale_pending(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sweep_user_stale_pending"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = now(), cancellation_reason = $3, updated_utc = now()
            WHERE user_id = $1 AND status = 'pending' AND created_utc < $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sweep pending subscriptions: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected())
    }

    /// Sweep `active` rows whose period has ended to `expired`, downgrading
    /// their profiles in the same transaction.
    #[instrument(skip(self))]
    pub async fn sweep_expired_active(&self) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sweep_expired_active"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        let expired_users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_utc = now()
            WHERE status = 'active' AND current_period_end IS NOT NULL AND current_period_end < now()
            RETURNING user_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sweep expired subscriptions: {}", e)))?;

        if !expired_users.is_empty() {
            sqlx::query(
                r#"
                UPDATE profiles
                SET subscription_status = 'free', updated_utc = now()
                WHERE user_id = ANY($1)
                "#,
            )
            .bind(&expired_users)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to downgrade profiles: {}", e)))?;
        }

        tx.commit().await?;
        timer.observe_duration();

        Ok(expired_users.len() as u64)
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Record a payment attempt outside of a state transition (e.g. a
    /// provider-pending notification). Returns false when the provider payment
    /// id was already recorded.
    #[instrument(skip(self, payment), fields(user_id = %payment.user_id))]
    pub async fn record_payment(&self, payment: &RecordPayment) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO payments (payment_id, subscription_id, user_id, amount, currency, status, provider, provider_payment_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (provider_payment_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.subscription_id)
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.provider.as_str())
        .bind(&payment.provider_payment_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Payment history for a user, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_payments(&self, user_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, subscription_id, user_id, amount, currency, status, provider, provider_payment_id, created_utc
            FROM payments
            WHERE user_id = $1
            ORDER BY created_utc DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list payments: {}", e)))?;

        timer.observe_duration();

        Ok(payments)
    }

    // =========================================================================
    // Profile Operations
    // =========================================================================

    /// Read the collapsed profile tier. A missing row is free.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_profile_status(&self, user_id: Uuid) -> Result<ProfileStatus, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_profile_status"])
            .start_timer();

        let status: Option<String> = sqlx::query_scalar(
            r#"
            SELECT subscription_status FROM profiles WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get profile: {}", e)))?;

        timer.observe_duration();

        Ok(status
            .as_deref()
            .map(ProfileStatus::from_stored)
            .unwrap_or(ProfileStatus::Free))
    }
}

/// Insert a payment row inside a transaction. The unique provider payment id
/// makes redelivered webhooks a no-op.
async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    payment: &RecordPayment,
    subscription_id: Option<Uuid>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO payments (payment_id, subscription_id, user_id, amount, currency, status, provider, provider_payment_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (provider_payment_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subscription_id.or(payment.subscription_id))
    .bind(payment.user_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(payment.provider.as_str())
    .bind(&payment.provider_payment_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record payment: {}", e)))?;

    Ok(())
}

/// Upsert the denormalized profile mirror inside the same transaction as the
/// subscription transition it mirrors.
async fn upsert_profile_status(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    status: ProfileStatus,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO profiles (user_id, subscription_status, updated_utc)
        VALUES ($1, $2, now())
        ON CONFLICT (user_id) DO UPDATE
        SET subscription_status = EXCLUDED.subscription_status, updated_utc = now()
        "#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update profile: {}", e)))?;

    Ok(())
}
